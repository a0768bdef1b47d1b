// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::page::Page;
use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::repositories::page_repository::{PageCounts, PageRepository};
use crate::infrastructure::database::entities::page as page_entity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// 页面仓库实现
#[derive(Clone)]
pub struct PageRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl PageRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<page_entity::Model> for Page {
    fn from(model: page_entity::Model) -> Self {
        Self {
            id: model.id,
            job_id: model.job_id,
            page_number: model.page_number,
            page_job_id: model.page_job_id,
            status: model.status.parse().unwrap_or_default(),
            storage_page_path: model.storage_page_path,
            markdown_content: model.markdown_content,
            storage_markdown_path: model.storage_markdown_path,
            error: model.error,
            retry_count: model.retry_count,
            updated_at: model.updated_at.with_timezone(&Utc),
            completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
        }
    }
}

impl From<&Page> for page_entity::ActiveModel {
    fn from(page: &Page) -> Self {
        Self {
            id: Set(page.id),
            job_id: Set(page.job_id),
            page_number: Set(page.page_number),
            page_job_id: Set(page.page_job_id),
            status: Set(page.status.to_string()),
            storage_page_path: Set(page.storage_page_path.clone()),
            markdown_content: Set(page.markdown_content.clone()),
            storage_markdown_path: Set(page.storage_markdown_path.clone()),
            error: Set(page.error.clone()),
            retry_count: Set(page.retry_count),
            updated_at: Set(page.updated_at.into()),
            completed_at: Set(page.completed_at.map(Into::into)),
        }
    }
}

const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

#[async_trait]
impl PageRepository for PageRepositoryImpl {
    async fn upsert_pages(&self, pages: &[Page]) -> Result<(), RepositoryError> {
        if pages.is_empty() {
            return Ok(());
        }

        let models: Vec<page_entity::ActiveModel> = pages.iter().map(Into::into).collect();
        page_entity::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([page_entity::Column::JobId, page_entity::Column::PageNumber])
                    .update_columns([
                        page_entity::Column::PageJobId,
                        page_entity::Column::Status,
                        page_entity::Column::StoragePagePath,
                        page_entity::Column::MarkdownContent,
                        page_entity::Column::StorageMarkdownPath,
                        page_entity::Column::Error,
                        page_entity::Column::RetryCount,
                        page_entity::Column::UpdatedAt,
                        page_entity::Column::CompletedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn get_pages(
        &self,
        job_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Page>, RepositoryError> {
        let limit = if limit == 0 { 100 } else { limit };
        let models = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .order_by_asc(page_entity::Column::PageNumber)
            .limit(limit)
            .offset(offset)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn find_page(
        &self,
        job_id: Uuid,
        page_number: i32,
    ) -> Result<Option<Page>, RepositoryError> {
        let model = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .filter(page_entity::Column::PageNumber.eq(page_number))
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(Into::into))
    }

    async fn update_page(&self, page: &Page) -> Result<Page, RepositoryError> {
        let model: page_entity::ActiveModel = page.into();
        let updated = model.update(self.db.as_ref()).await?;
        Ok(updated.into())
    }

    async fn count_by_status(&self, job_id: Uuid) -> Result<PageCounts, RepositoryError> {
        let total = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .count(self.db.as_ref())
            .await?;
        let completed = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .filter(page_entity::Column::Status.eq("completed"))
            .count(self.db.as_ref())
            .await?;
        let failed = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .filter(page_entity::Column::Status.eq("failed"))
            .count(self.db.as_ref())
            .await?;
        let non_terminal = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .filter(page_entity::Column::Status.is_not_in(TERMINAL_STATUSES))
            .count(self.db.as_ref())
            .await?;

        Ok(PageCounts {
            total,
            completed,
            failed,
            non_terminal,
        })
    }

    async fn last_terminal_transition(
        &self,
        job_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let model = page_entity::Entity::find()
            .filter(page_entity::Column::JobId.eq(job_id))
            .filter(page_entity::Column::Status.is_in(TERMINAL_STATUSES))
            .order_by_desc(page_entity::Column::UpdatedAt)
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(|m| m.updated_at.with_timezone(&Utc)))
    }

    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64, RepositoryError> {
        let result = page_entity::Entity::delete_many()
            .filter(page_entity::Column::JobId.eq(job_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
