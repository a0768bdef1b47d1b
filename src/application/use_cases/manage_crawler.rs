// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::application::dto::requests::ExecutionProgress;
use crate::domain::models::crawler_config::CrawlerConfig;
use crate::domain::models::crawler_schedule::CrawlerSchedule;
use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::models::work_task::{ExecuteCrawlerPayload, TaskKind, WorkTask};
use crate::domain::repositories::job_repository::{update_with_retry, JobRepository};
use crate::queue::crawl_scheduler::CrawlScheduler;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::CoreError;

/// 爬虫生命周期操作
///
/// pause/resume/stop/update/run_now/list_executions；
/// 全部幂等，状态机非法转换以InvalidInput上抛
pub struct ManageCrawlerUseCase {
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    scheduler: Arc<CrawlScheduler>,
}

impl ManageCrawlerUseCase {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        scheduler: Arc<CrawlScheduler>,
    ) -> Self {
        Self {
            jobs,
            queue,
            scheduler,
        }
    }

    async fn load_crawler(&self, crawler_id: Uuid) -> Result<Job, CoreError> {
        let job = self
            .jobs
            .find_by_id(crawler_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(crawler_id.to_string()))?;

        if job.job_type != JobType::Crawler || job.parent_job_id.is_some() {
            return Err(CoreError::InvalidInput(format!(
                "job {} is not a crawler",
                crawler_id
            )));
        }
        Ok(job)
    }

    /// 暂停调度；运行中的执行不受影响。重复暂停是no-op
    pub async fn pause(&self, crawler_id: Uuid) -> Result<Job, CoreError> {
        self.load_crawler(crawler_id).await?;
        let job = update_with_retry(self.jobs.as_ref(), crawler_id, |job| {
            if job.status == JobStatus::Paused {
                return Ok(());
            }
            job.pause()
        })
        .await
        .map_err(map_repo_error)?;
        self.scheduler.pause_crawler(crawler_id);
        info!("crawler {} paused", crawler_id);
        Ok(job)
    }

    /// 恢复调度：从恢复时刻之后的下一个cron边界开始，不补发
    pub async fn resume(&self, crawler_id: Uuid) -> Result<Job, CoreError> {
        self.load_crawler(crawler_id).await?;
        let job = update_with_retry(self.jobs.as_ref(), crawler_id, |job| {
            if job.status == JobStatus::Active {
                return Ok(());
            }
            job.resume()
        })
        .await
        .map_err(map_repo_error)?;
        self.scheduler
            .register_crawler(crawler_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        info!("crawler {} resumed", crawler_id);
        Ok(job)
    }

    /// 永久停止（终态，注销调度）。重复停止是no-op
    pub async fn stop(&self, crawler_id: Uuid) -> Result<Job, CoreError> {
        self.load_crawler(crawler_id).await?;
        let job = update_with_retry(self.jobs.as_ref(), crawler_id, |job| {
            if job.status == JobStatus::Stopped {
                return Ok(());
            }
            job.stop()
        })
        .await
        .map_err(map_repo_error)?;
        self.scheduler.unregister_crawler(crawler_id);
        info!("crawler {} stopped", crawler_id);
        Ok(job)
    }

    /// 更新配置与调度
    pub async fn update(
        &self,
        crawler_id: Uuid,
        config: Option<CrawlerConfig>,
        schedule: Option<CrawlerSchedule>,
    ) -> Result<Job, CoreError> {
        self.load_crawler(crawler_id).await?;

        if let Some(config) = &config {
            config
                .validate()
                .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        }
        if let Some(schedule) = &schedule {
            schedule
                .validate()
                .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        }

        let job = update_with_retry(self.jobs.as_ref(), crawler_id, |job| {
            if let Some(config) = config.clone() {
                job.crawler_config = Some(config);
            }
            if let Some(schedule) = schedule.clone() {
                job.crawler_schedule = Some(schedule);
            }
            Ok(())
        })
        .await
        .map_err(map_repo_error)?;

        self.scheduler
            .update_crawler(crawler_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(job)
    }

    /// 手动触发：绕过调度器直接投递，不推进next_runs
    pub async fn run_now(&self, crawler_id: Uuid) -> Result<(), CoreError> {
        let crawler = self.load_crawler(crawler_id).await?;
        if crawler.is_terminal() {
            return Err(CoreError::InvalidInput(format!(
                "crawler {} is {}",
                crawler_id, crawler.status
            )));
        }

        let payload = ExecuteCrawlerPayload {
            crawler_job_id: crawler_id,
            fire_instant: Utc::now(),
        };
        self.queue
            .enqueue(WorkTask::new(
                TaskKind::ExecuteCrawler,
                serde_json::to_value(&payload)
                    .map_err(|e| CoreError::InvalidInput(e.to_string()))?,
            ))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        info!("manual run enqueued for crawler {}", crawler_id);
        Ok(())
    }

    /// 执行历史，最新在前
    pub async fn list_executions(&self, crawler_id: Uuid) -> Result<Vec<Job>, CoreError> {
        self.load_crawler(crawler_id).await?;
        self.jobs
            .find_crawler_executions(crawler_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))
    }

    /// 单次执行的进度视图
    pub async fn get_execution_progress(
        &self,
        execution_id: Uuid,
    ) -> Result<ExecutionProgress, CoreError> {
        let execution = self
            .jobs
            .find_by_id(execution_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(execution_id.to_string()))?;

        if !execution.is_execution() {
            return Err(CoreError::InvalidInput(format!(
                "job {} is not a crawler execution",
                execution_id
            )));
        }

        let meta = execution.execution_meta.as_ref();
        Ok(ExecutionProgress {
            execution_id,
            status: execution.status.to_string(),
            progress: execution.progress,
            files_downloaded: meta.map(|m| m.files_downloaded).unwrap_or(0),
            files_failed: meta.map(|m| m.files_failed).unwrap_or(0),
            error: execution.error.clone(),
        })
    }
}

fn map_repo_error(e: crate::domain::repositories::job_repository::RepositoryError) -> CoreError {
    use crate::domain::repositories::job_repository::RepositoryError;
    match e {
        RepositoryError::NotFound => CoreError::NotFound("job".to_string()),
        RepositoryError::Conflict(m) => CoreError::Conflict(m),
        RepositoryError::Internal(m) if m.contains("Invalid state transition") => {
            CoreError::InvalidInput(m)
        }
        other => CoreError::Transient(other.to_string()),
    }
}
