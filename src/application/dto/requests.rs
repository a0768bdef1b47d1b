// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::crawler_config::CrawlerConfig;
use crate::domain::models::crawler_schedule::CrawlerSchedule;
use crate::domain::models::job::SourceType;

/// 创建文档转换作业请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub user_id: Uuid,
    pub source_type: SourceType,
    /// url/gdrive/dropbox来源的地址
    #[serde(default)]
    pub source_url: Option<String>,
    pub name: String,
    /// 已上传文档在uploads桶内的key
    pub upload_key: String,
}

/// 创建爬虫作业请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCrawlerRequest {
    pub user_id: Uuid,
    pub url: String,
    pub name: String,
    pub config: CrawlerConfig,
    pub schedule: CrawlerSchedule,
}

/// 相似作业警告
///
/// 从不阻塞创建；API把它附加在响应上
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateWarning {
    pub url_pattern: String,
    pub similar_job_ids: Vec<Uuid>,
}

/// 执行进度视图
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub status: String,
    pub progress: i32,
    pub files_downloaded: u64,
    pub files_failed: u64,
    pub error: Option<String>,
}
