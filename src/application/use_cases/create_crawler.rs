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

use std::sync::Arc;
use tracing::info;

use crate::application::dto::requests::{CreateCrawlerRequest, DuplicateWarning};
use crate::domain::models::job::Job;
use crate::domain::repositories::job_repository::JobRepository;
use crate::domain::services::url_normalizer;
use crate::queue::crawl_scheduler::CrawlScheduler;
use crate::utils::errors::CoreError;

/// 创建爬虫作业
///
/// URL安全校验、配置/调度校验、相似作业检测（只警告不阻塞）、
/// 注册到调度器
pub struct CreateCrawlerUseCase {
    jobs: Arc<dyn JobRepository>,
    scheduler: Arc<CrawlScheduler>,
}

impl CreateCrawlerUseCase {
    pub fn new(jobs: Arc<dyn JobRepository>, scheduler: Arc<CrawlScheduler>) -> Self {
        Self { jobs, scheduler }
    }

    pub async fn execute(
        &self,
        request: CreateCrawlerRequest,
    ) -> Result<(Job, Option<DuplicateWarning>), CoreError> {
        let normalized = url_normalizer::normalize(&request.url)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let pattern = url_normalizer::pattern(&request.url)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        request
            .config
            .validate()
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        request
            .schedule
            .validate()
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        // 相似作业检测失败不阻塞创建
        let warning = match self.jobs.find_similar(&pattern).await {
            Ok(similar) if !similar.is_empty() => Some(DuplicateWarning {
                url_pattern: pattern.clone(),
                similar_job_ids: similar.iter().map(|j| j.id).collect(),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("similar-job lookup failed: {}", e);
                None
            }
        };

        let job = Job::new_crawler(
            request.user_id,
            normalized,
            pattern,
            request.name,
            request.config,
            request.schedule,
        );
        self.jobs
            .create(&job)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        self.scheduler
            .register_crawler(job.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        info!(
            "created crawler {} for {} (duplicates: {})",
            job.id,
            job.source_url.as_deref().unwrap_or("-"),
            warning.as_ref().map(|w| w.similar_job_ids.len()).unwrap_or(0)
        );
        Ok((job, warning))
    }
}
