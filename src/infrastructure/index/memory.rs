// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::repositories::progress_index::{
    IndexDocument, IndexError, IndexStream, ProgressIndexer,
};

/// 内存进度索引（测试用）
#[derive(Default, Clone)]
pub struct InMemoryIndexer {
    documents: Arc<RwLock<Vec<IndexDocument>>>,
}

impl InMemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按流读取已写入的文档
    pub async fn stream_documents(&self, stream: IndexStream) -> Vec<serde_json::Value> {
        self.documents
            .read()
            .await
            .iter()
            .filter(|d| d.stream == stream)
            .map(|d| d.body.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProgressIndexer for InMemoryIndexer {
    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<(), IndexError> {
        self.documents.write().await.extend_from_slice(documents);
        Ok(())
    }
}
