// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::page::Page;
use crate::domain::repositories::job_repository::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 页面统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub non_terminal: u64,
}

/// 页面仓库特质
#[async_trait]
pub trait PageRepository: Send + Sync {
    /// 批量upsert页面行（按 (job_id, page_number) 唯一键）
    async fn upsert_pages(&self, pages: &[Page]) -> Result<(), RepositoryError>;
    /// 分页读取作业的页面，按page_number升序
    async fn get_pages(
        &self,
        job_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Page>, RepositoryError>;
    /// 查找指定页
    async fn find_page(
        &self,
        job_id: Uuid,
        page_number: i32,
    ) -> Result<Option<Page>, RepositoryError>;
    /// 更新单页
    async fn update_page(&self, page: &Page) -> Result<Page, RepositoryError>;
    /// 统计各状态页数
    async fn count_by_status(&self, job_id: Uuid) -> Result<PageCounts, RepositoryError>;
    /// 最近一次页面进入终态的时刻（合并宽限期判定）
    async fn last_terminal_transition(
        &self,
        job_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;
    /// 删除作业的全部页面行
    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64, RepositoryError>;
}

impl PageCounts {
    /// 所有页面是否都已进入终态
    pub fn all_terminal(&self) -> bool {
        self.non_terminal == 0 && self.total > 0
    }
}
