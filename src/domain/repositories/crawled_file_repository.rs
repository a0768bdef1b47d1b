// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::crawled_file::CrawledFile;
use crate::domain::repositories::job_repository::RepositoryError;
use async_trait::async_trait;
use uuid::Uuid;

/// 爬取文件统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub total: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// 爬取文件仓库特质
#[async_trait]
pub trait CrawledFileRepository: Send + Sync {
    /// 记录文件行
    async fn create(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError>;
    /// 更新文件行
    async fn update(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError>;
    /// 列出一次执行的全部文件
    async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<CrawledFile>, RepositoryError>;
    /// 统计一次执行的文件状态
    async fn count_by_status(&self, execution_id: Uuid) -> Result<FileCounts, RepositoryError>;
    /// 删除一次执行的全部文件行（级联）
    async fn delete_by_execution(&self, execution_id: Uuid) -> Result<u64, RepositoryError>;
}
