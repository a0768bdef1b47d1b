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

use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::repositories::job_repository::{JobQuery, JobRepository, RepositoryError};
use crate::domain::services::duplicate_detector;
use crate::infrastructure::database::entities::job as job_entity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

/// 作业仓库实现
///
/// 基于SeaORM的数据访问层；update 以 updated_at 做CAS
#[derive(Clone)]
pub struct JobRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl JobRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn model_to_job(model: job_entity::Model) -> Result<Job, RepositoryError> {
    let crawler_config = model
        .crawler_config
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(format!("bad crawler_config blob: {}", e)))?;
    let crawler_schedule = model
        .crawler_schedule
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(format!("bad crawler_schedule blob: {}", e)))?;
    let execution_meta = model
        .execution_meta
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(format!("bad execution_meta blob: {}", e)))?;

    Ok(Job {
        id: model.id,
        user_id: model.user_id,
        job_type: model.job_type.parse().unwrap_or_default(),
        status: model.status.parse().unwrap_or_default(),
        progress: model.progress,
        source_type: model.source_type.parse().unwrap_or_default(),
        source_url: model.source_url,
        url_pattern: model.url_pattern,
        name: model.name,
        parent_job_id: model.parent_job_id,
        error: model.error,
        total_pages: model.total_pages,
        pages_completed: model.pages_completed,
        pages_failed: model.pages_failed,
        storage_upload_path: model.storage_upload_path,
        storage_result_path: model.storage_result_path,
        crawler_config,
        crawler_schedule,
        execution_meta,
        created_at: model.created_at.with_timezone(&Utc),
        started_at: model.started_at.map(|t| t.with_timezone(&Utc)),
        completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn job_to_active_model(job: &Job) -> Result<job_entity::ActiveModel, RepositoryError> {
    let crawler_config = job
        .crawler_config
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;
    let crawler_schedule = job
        .crawler_schedule
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;
    let execution_meta = job
        .execution_meta
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RepositoryError::Internal(e.to_string()))?;

    Ok(job_entity::ActiveModel {
        id: Set(job.id),
        user_id: Set(job.user_id),
        job_type: Set(job.job_type.to_string()),
        status: Set(job.status.to_string()),
        progress: Set(job.progress),
        source_type: Set(job.source_type.to_string()),
        source_url: Set(job.source_url.clone()),
        url_pattern: Set(job.url_pattern.clone()),
        name: Set(job.name.clone()),
        parent_job_id: Set(job.parent_job_id),
        error: Set(job.error.clone()),
        total_pages: Set(job.total_pages),
        pages_completed: Set(job.pages_completed),
        pages_failed: Set(job.pages_failed),
        storage_upload_path: Set(job.storage_upload_path.clone()),
        storage_result_path: Set(job.storage_result_path.clone()),
        crawler_config: Set(crawler_config),
        crawler_schedule: Set(crawler_schedule),
        execution_meta: Set(execution_meta),
        created_at: Set(job.created_at.into()),
        started_at: Set(job.started_at.map(Into::into)),
        completed_at: Set(job.completed_at.map(Into::into)),
        updated_at: Set(job.updated_at.into()),
    })
}

const TERMINAL_STATUSES: [&str; 4] = ["completed", "failed", "cancelled", "stopped"];

#[async_trait]
impl JobRepository for JobRepositoryImpl {
    async fn create(&self, job: &Job) -> Result<Job, RepositoryError> {
        let model = job_to_active_model(job)?;
        model.insert(self.db.as_ref()).await?;
        Ok(job.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        let model = job_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        model.map(model_to_job).transpose()
    }

    async fn update(
        &self,
        job: &Job,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Job, RepositoryError> {
        let txn = self.db.begin().await?;

        let current = job_entity::Entity::find_by_id(job.id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if current.updated_at.with_timezone(&Utc) != expected_updated_at {
            txn.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "job {} changed concurrently",
                job.id
            )));
        }

        let model = job_to_active_model(job)?;
        let updated = model.update(&txn).await?;
        txn.commit().await?;

        model_to_job(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        // 子作业、页面与爬取文件行由外键级联删除
        let result = job_entity::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<(Vec<Job>, u64), RepositoryError> {
        let mut finder = job_entity::Entity::find()
            .filter(job_entity::Column::UserId.eq(user_id))
            .filter(job_entity::Column::ParentJobId.is_null());

        if let Some(status) = query.status {
            finder = finder.filter(job_entity::Column::Status.eq(status.to_string()));
        }
        if let Some(job_type) = query.job_type {
            finder = finder.filter(job_entity::Column::JobType.eq(job_type.to_string()));
        }

        let total = finder.clone().count(self.db.as_ref()).await?;

        let limit = if query.limit == 0 { 50 } else { query.limit };
        let models = finder
            .order_by_desc(job_entity::Column::CreatedAt)
            .limit(limit)
            .offset(query.offset)
            .all(self.db.as_ref())
            .await?;

        let jobs = models
            .into_iter()
            .map(model_to_job)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    async fn find_children(&self, parent_job_id: Uuid) -> Result<Vec<Job>, RepositoryError> {
        let models = job_entity::Entity::find()
            .filter(job_entity::Column::ParentJobId.eq(parent_job_id))
            .order_by_asc(job_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(model_to_job).collect()
    }

    async fn find_crawler_jobs(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<Vec<Job>, RepositoryError> {
        let mut finder = job_entity::Entity::find()
            .filter(job_entity::Column::UserId.eq(user_id))
            .filter(job_entity::Column::JobType.eq(JobType::Crawler.to_string()))
            .filter(job_entity::Column::ParentJobId.is_null());

        if let Some(status) = query.status {
            finder = finder.filter(job_entity::Column::Status.eq(status.to_string()));
        }

        let limit = if query.limit == 0 { 50 } else { query.limit };
        let models = finder
            .order_by_desc(job_entity::Column::CreatedAt)
            .limit(limit)
            .offset(query.offset)
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(model_to_job).collect()
    }

    async fn find_active_crawlers(&self) -> Result<Vec<Job>, RepositoryError> {
        let models = job_entity::Entity::find()
            .filter(job_entity::Column::JobType.eq(JobType::Crawler.to_string()))
            .filter(job_entity::Column::Status.eq(JobStatus::Active.to_string()))
            .filter(job_entity::Column::ParentJobId.is_null())
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(model_to_job).collect()
    }

    async fn find_crawler_executions(
        &self,
        crawler_id: Uuid,
    ) -> Result<Vec<Job>, RepositoryError> {
        let models = job_entity::Entity::find()
            .filter(job_entity::Column::ParentJobId.eq(crawler_id))
            .filter(job_entity::Column::JobType.eq(JobType::Crawler.to_string()))
            .order_by_desc(job_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(model_to_job).collect()
    }

    async fn find_execution_by_fire_instant(
        &self,
        crawler_id: Uuid,
        fire_instant: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError> {
        // fire_instant位于JSON blob内，按爬虫过滤后在应用侧比较
        let executions = self.find_crawler_executions(crawler_id).await?;
        Ok(executions.into_iter().find(|job| {
            job.execution_meta
                .as_ref()
                .and_then(|meta| meta.fire_instant)
                == Some(fire_instant)
        }))
    }

    async fn find_similar(&self, url_pattern: &str) -> Result<Vec<Job>, RepositoryError> {
        let models = job_entity::Entity::find()
            .filter(job_entity::Column::UrlPattern.is_not_null())
            .filter(job_entity::Column::Status.is_not_in(TERMINAL_STATUSES))
            .all(self.db.as_ref())
            .await?;

        let mut matches = Vec::new();
        for model in models {
            let candidate = model
                .url_pattern
                .clone()
                .unwrap_or_default();
            if duplicate_detector::patterns_match(url_pattern, &candidate) {
                matches.push(model_to_job(model)?);
            }
        }
        Ok(matches)
    }

    async fn find_stuck(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, RepositoryError> {
        let models = job_entity::Entity::find()
            .filter(job_entity::Column::Status.eq(JobStatus::Processing.to_string()))
            .filter(job_entity::Column::StartedAt.lte(started_before))
            .all(self.db.as_ref())
            .await?;
        models.into_iter().map(model_to_job).collect()
    }
}
