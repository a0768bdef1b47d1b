// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::job::{DomainError, JobStatus};
use crate::utils::errors::truncate_error;

/// 页面重试上限
pub const MAX_PAGE_RETRIES: i32 = 3;

/// 页面实体
///
/// 由split步骤创建，page worker更新，merge聚合；
/// (job_id, page_number) 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    /// 所属main作业ID
    pub job_id: Uuid,
    /// 页码（1-based）
    pub page_number: i32,
    /// 当前负责该页的page作业ID，重试时替换
    pub page_job_id: Option<Uuid>,
    pub status: JobStatus,
    /// 单页PDF在对象存储中的路径
    pub storage_page_path: Option<String>,
    /// 行内markdown；超过阈值时为None并由存储指针承载
    pub markdown_content: Option<String>,
    /// 超长markdown的存储指针
    pub storage_markdown_path: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Page {
    pub fn new(job_id: Uuid, page_number: i32, storage_page_path: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            page_number,
            page_job_id: None,
            status: JobStatus::Queued,
            storage_page_path: Some(storage_page_path),
            markdown_content: None,
            storage_markdown_path: None,
            error: None,
            retry_count: 0,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    /// 标记转换成功
    pub fn mark_completed(&mut self, markdown: Option<String>, pointer: Option<String>) {
        self.status = JobStatus::Completed;
        self.markdown_content = markdown;
        self.storage_markdown_path = pointer;
        self.error = None;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// 标记转换失败
    pub fn mark_failed(&mut self, message: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(truncate_error(message));
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// 是否还可重试
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < MAX_PAGE_RETRIES
    }

    /// 为重试重置页面并指向新的page作业
    ///
    /// retry_count 上限3，达到后拒绝
    pub fn reset_for_retry(&mut self, new_page_job_id: Uuid) -> Result<(), DomainError> {
        if self.status != JobStatus::Failed {
            return Err(DomainError::Validation(format!(
                "page {} is not failed (status {})",
                self.page_number, self.status
            )));
        }
        if self.retry_count >= MAX_PAGE_RETRIES {
            return Err(DomainError::Validation(format!(
                "page {} exhausted its {} retries",
                self.page_number, MAX_PAGE_RETRIES
            )));
        }

        self.retry_count += 1;
        self.page_job_id = Some(new_page_job_id);
        self.status = JobStatus::Queued;
        self.error = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Page {
        Page::new(Uuid::new_v4(), 1, "pages/job/page_0001.pdf".to_string())
    }

    #[test]
    fn test_retry_cap_enforced() {
        let mut page = page();

        for _ in 0..MAX_PAGE_RETRIES {
            page.mark_failed("conversion error");
            page.reset_for_retry(Uuid::new_v4()).unwrap();
        }
        assert_eq!(page.retry_count, MAX_PAGE_RETRIES);

        page.mark_failed("conversion error");
        assert!(!page.can_retry());
        assert!(page.reset_for_retry(Uuid::new_v4()).is_err());
        assert_eq!(page.retry_count, MAX_PAGE_RETRIES);
    }

    #[test]
    fn test_retry_requires_failed_status() {
        let mut page = page();
        page.mark_completed(Some("# ok".to_string()), None);
        assert!(page.reset_for_retry(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_retry_resets_state() {
        let mut page = page();
        page.mark_failed("boom");

        let new_job = Uuid::new_v4();
        page.reset_for_retry(new_job).unwrap();

        assert_eq!(page.status, JobStatus::Queued);
        assert_eq!(page.page_job_id, Some(new_job));
        assert!(page.error.is_none());
        assert_eq!(page.retry_count, 1);
    }
}
