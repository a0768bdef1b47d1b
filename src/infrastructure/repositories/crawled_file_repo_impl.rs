// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::crawled_file::CrawledFile;
use crate::domain::repositories::crawled_file_repository::{CrawledFileRepository, FileCounts};
use crate::domain::repositories::job_repository::RepositoryError;
use crate::infrastructure::database::entities::crawled_file as file_entity;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// 爬取文件仓库实现
#[derive(Clone)]
pub struct CrawledFileRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl CrawledFileRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<file_entity::Model> for CrawledFile {
    fn from(model: file_entity::Model) -> Self {
        Self {
            id: model.id,
            execution_id: model.execution_id,
            url: model.url,
            filename: model.filename,
            file_type: model.file_type,
            mime_type: model.mime_type,
            size_bytes: model.size_bytes,
            storage_path: model.storage_path,
            public_url: model.public_url,
            status: model.status.parse().unwrap_or_default(),
            error: model.error,
            downloaded_at: model.downloaded_at.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

impl From<&CrawledFile> for file_entity::ActiveModel {
    fn from(file: &CrawledFile) -> Self {
        Self {
            id: Set(file.id),
            execution_id: Set(file.execution_id),
            url: Set(file.url.clone()),
            filename: Set(file.filename.clone()),
            file_type: Set(file.file_type.clone()),
            mime_type: Set(file.mime_type.clone()),
            size_bytes: Set(file.size_bytes),
            storage_path: Set(file.storage_path.clone()),
            public_url: Set(file.public_url.clone()),
            status: Set(file.status.to_string()),
            error: Set(file.error.clone()),
            downloaded_at: Set(file.downloaded_at.map(Into::into)),
            created_at: Set(file.created_at.into()),
        }
    }
}

#[async_trait]
impl CrawledFileRepository for CrawledFileRepositoryImpl {
    async fn create(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError> {
        let model: file_entity::ActiveModel = file.into();
        model.insert(self.db.as_ref()).await?;
        Ok(file.clone())
    }

    async fn update(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError> {
        let model: file_entity::ActiveModel = file.into();
        let updated = model.update(self.db.as_ref()).await?;
        Ok(updated.into())
    }

    async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<CrawledFile>, RepositoryError> {
        let models = file_entity::Entity::find()
            .filter(file_entity::Column::ExecutionId.eq(execution_id))
            .order_by_asc(file_entity::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn count_by_status(&self, execution_id: Uuid) -> Result<FileCounts, RepositoryError> {
        let count_for = |status: &'static str| {
            let db = self.db.clone();
            async move {
                file_entity::Entity::find()
                    .filter(file_entity::Column::ExecutionId.eq(execution_id))
                    .filter(file_entity::Column::Status.eq(status))
                    .count(db.as_ref())
                    .await
            }
        };

        let total = file_entity::Entity::find()
            .filter(file_entity::Column::ExecutionId.eq(execution_id))
            .count(self.db.as_ref())
            .await?;

        Ok(FileCounts {
            total,
            downloaded: count_for("downloaded").await?,
            failed: count_for("failed").await?,
            skipped: count_for("skipped").await?,
        })
    }

    async fn delete_by_execution(&self, execution_id: Uuid) -> Result<u64, RepositoryError> {
        let result = file_entity::Entity::delete_many()
            .filter(file_entity::Column::ExecutionId.eq(execution_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
