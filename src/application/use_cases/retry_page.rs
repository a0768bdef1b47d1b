// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::models::work_task::{ConvertPagePayload, TaskKind, WorkTask};
use crate::domain::repositories::job_repository::JobRepository;
use crate::domain::repositories::page_repository::PageRepository;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::CoreError;

/// 重试失败页面
///
/// 仅当页面failed且retry_count<3时有效：建一个新的page作业，
/// 把页面行指向它并递增retry_count，再投递convert_page任务。
/// 新页面落地后合并会随终态检查重跑
pub struct RetryPageUseCase {
    jobs: Arc<dyn JobRepository>,
    pages: Arc<dyn PageRepository>,
    queue: Arc<dyn TaskQueue>,
}

impl RetryPageUseCase {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pages: Arc<dyn PageRepository>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self { jobs, pages, queue }
    }

    /// 返回新page作业的id
    pub async fn execute(&self, page_job_id: Uuid) -> Result<Uuid, CoreError> {
        let page_job = self
            .jobs
            .find_by_id(page_job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(page_job_id.to_string()))?;

        if page_job.job_type != JobType::Page {
            return Err(CoreError::InvalidInput(format!(
                "job {} is not a page job",
                page_job_id
            )));
        }
        let main_id = page_job.parent_job_id.ok_or_else(|| {
            CoreError::InvalidInput("page job has no parent".to_string())
        })?;
        let main = self
            .jobs
            .find_by_id(main_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(main_id.to_string()))?;

        let mut page = self
            .pages
            .get_pages(main_id, main.total_pages.max(1) as u64, 0)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .into_iter()
            .find(|p| p.page_job_id == Some(page_job_id))
            .ok_or_else(|| {
                CoreError::NotFound(format!("no page row owned by job {}", page_job_id))
            })?;

        if page.status != JobStatus::Failed {
            return Err(CoreError::InvalidInput(format!(
                "page {} is {}, only failed pages can be retried",
                page.page_number, page.status
            )));
        }
        if !page.can_retry() {
            return Err(CoreError::InvalidInput(format!(
                "page {} has exhausted its retries",
                page.page_number
            )));
        }

        let new_page_job = Job::new_child(
            &main,
            JobType::Page,
            format!("{} - page {} (retry {})", main.name, page.page_number, page.retry_count + 1),
        );
        self.jobs
            .create(&new_page_job)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        page.reset_for_retry(new_page_job.id)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        self.pages
            .update_page(&page)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let payload = ConvertPagePayload {
            main_job_id: main_id,
            page_job_id: new_page_job.id,
            page_number: page.page_number,
        };
        self.queue
            .enqueue(WorkTask::new(
                TaskKind::ConvertPage,
                serde_json::to_value(&payload)
                    .map_err(|e| CoreError::InvalidInput(e.to_string()))?,
            ))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        info!(
            "retry queued for page {} of job {} (attempt {})",
            page.page_number, main_id, page.retry_count
        );
        Ok(new_page_job.id)
    }
}
