// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 进度索引模块
///
/// 追加型观测视图：Elasticsearch后端、内存后端与批量写入器
pub mod bulk_writer;
pub mod elastic;
pub mod memory;

use std::sync::Arc;

use crate::config::settings::IndexerSettings;
use crate::domain::repositories::progress_index::ProgressIndexer;

/// 索引工厂函数
pub fn create_indexer(settings: &IndexerSettings) -> Arc<dyn ProgressIndexer> {
    match settings.backend.as_str() {
        "memory" => Arc::new(memory::InMemoryIndexer::new()),
        _ => Arc::new(elastic::ElasticIndexer::new(settings)),
    }
}
