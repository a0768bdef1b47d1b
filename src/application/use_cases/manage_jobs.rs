// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::job::{Job, JobType};
use crate::domain::repositories::job_repository::{
    update_with_retry, JobQuery, JobRepository,
};
use crate::domain::repositories::storage_repository::{
    ObjectStore, BUCKET_CRAWLED, BUCKET_PAGES, BUCKET_RESULTS, BUCKET_UPLOADS,
};
use crate::queue::crawl_scheduler::CrawlScheduler;
use crate::utils::errors::CoreError;

/// 作业查询与生命周期操作
///
/// get/list/cancel/delete；删除级联清理作业行、页面、
/// 爬取文件与对象存储前缀
pub struct ManageJobsUseCase {
    jobs: Arc<dyn JobRepository>,
    storage: Arc<dyn ObjectStore>,
    scheduler: Arc<CrawlScheduler>,
}

impl ManageJobsUseCase {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        storage: Arc<dyn ObjectStore>,
        scheduler: Arc<CrawlScheduler>,
    ) -> Self {
        Self {
            jobs,
            storage,
            scheduler,
        }
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, CoreError> {
        self.jobs
            .find_by_id(job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))
    }

    pub async fn list_jobs(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<(Vec<Job>, u64), CoreError> {
        self.jobs
            .list_by_user(user_id, query)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))
    }

    /// 取消作业
    ///
    /// 对终态作业是no-op并返回成功；运行中的worker在步骤间
    /// 观察到cancelled后丢弃结果
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job, CoreError> {
        let job = self.get_job(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        let cancelled = update_with_retry(self.jobs.as_ref(), job_id, |job| {
            if job.job_type == JobType::Crawler && job.parent_job_id.is_none() {
                // 爬虫本体的取消等价stop
                job.stop()?;
            } else {
                job.cancel()?;
            }
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        if cancelled.job_type == JobType::Crawler && cancelled.parent_job_id.is_none() {
            self.scheduler.unregister_crawler(job_id);
        }

        // 未完成的子作业一并取消
        let children = self
            .jobs
            .find_children(job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        for child in children.into_iter().filter(|c| !c.is_terminal()) {
            update_with_retry(self.jobs.as_ref(), child.id, |job| job.cancel())
                .await
                .ok();
        }

        info!("job {} cancelled", job_id);
        Ok(cancelled)
    }

    /// 删除作业及其全部归属物
    ///
    /// 行级联由存储层处理；这里负责blob前缀清理。
    /// 前缀列举为空即视为清理完成（幂等）
    pub async fn delete_job(&self, job_id: Uuid) -> Result<(), CoreError> {
        let job = self.get_job(job_id).await?;

        // 先收集爬虫执行id，行删除后就查不到了
        let executions = if job.job_type == JobType::Crawler && job.parent_job_id.is_none() {
            self.scheduler.unregister_crawler(job_id);
            self.jobs
                .find_crawler_executions(job_id)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?
        } else {
            Vec::new()
        };

        self.jobs
            .delete(job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        // blob清理：上传物、单页PDF、结果与爬取产物
        if let Some(upload_key) = &job.storage_upload_path {
            self.storage
                .delete(BUCKET_UPLOADS, upload_key)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;
        }
        self.storage
            .delete_prefix(BUCKET_PAGES, &format!("{}/", job_id))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        self.storage
            .delete_prefix(BUCKET_RESULTS, &format!("{}/", job_id))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        for execution in &executions {
            self.storage
                .delete_prefix(BUCKET_CRAWLED, &format!("{}/", execution.id))
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;
        }

        info!("job {} deleted with {} executions", job_id, executions.len());
        Ok(())
    }
}
