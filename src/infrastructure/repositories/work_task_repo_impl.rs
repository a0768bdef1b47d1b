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

use crate::domain::models::work_task::{QueueName, TaskStatus, WorkTask};
use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::repositories::work_task_repository::WorkTaskRepository;
use crate::infrastructure::database::entities::work_task as task_entity;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

/// worker锁的持有时长
const LOCK_DURATION_MINUTES: i64 = 60;

/// 工作队列仓库实现
///
/// 抢占用 FOR UPDATE SKIP LOCKED；锁过期即硬超时，
/// 由监控worker的reset_stuck回收
#[derive(Clone)]
pub struct WorkTaskRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl WorkTaskRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<task_entity::Model> for WorkTask {
    fn from(model: task_entity::Model) -> Self {
        Self {
            id: model.id,
            kind: model.kind.parse().unwrap_or(
                crate::domain::models::work_task::TaskKind::ConvertPage,
            ),
            queue: model.queue.parse().unwrap_or(QueueName::Conversion),
            payload: model.payload,
            status: model.status.parse().unwrap_or_default(),
            priority: model.priority,
            attempt_count: model.attempt_count,
            max_retries: model.max_retries,
            scheduled_at: model.scheduled_at.map(|t| t.with_timezone(&Utc)),
            expires_at: model.expires_at.map(|t| t.with_timezone(&Utc)),
            lock_token: model.lock_token,
            lock_expires_at: model.lock_expires_at.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
            started_at: model.started_at.map(|t| t.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|t| t.with_timezone(&Utc)),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

impl From<&WorkTask> for task_entity::ActiveModel {
    fn from(task: &WorkTask) -> Self {
        Self {
            id: Set(task.id),
            kind: Set(task.kind.to_string()),
            queue: Set(task.queue.to_string()),
            payload: Set(task.payload.clone()),
            status: Set(task.status.to_string()),
            priority: Set(task.priority),
            attempt_count: Set(task.attempt_count),
            max_retries: Set(task.max_retries),
            scheduled_at: Set(task.scheduled_at.map(Into::into)),
            expires_at: Set(task.expires_at.map(Into::into)),
            lock_token: Set(task.lock_token),
            lock_expires_at: Set(task.lock_expires_at.map(Into::into)),
            created_at: Set(task.created_at.into()),
            started_at: Set(task.started_at.map(Into::into)),
            completed_at: Set(task.completed_at.map(Into::into)),
            updated_at: Set(task.updated_at.into()),
        }
    }
}

impl WorkTaskRepositoryImpl {
    async fn set_status(&self, id: Uuid, status: TaskStatus) -> Result<(), RepositoryError> {
        let model = task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let mut active: task_entity::ActiveModel = model.into();
        active.status = Set(status.to_string());
        active.completed_at = Set(Some(Utc::now().into()));
        active.lock_token = Set(None);
        active.lock_expires_at = Set(None);
        active.updated_at = Set(Utc::now().into());
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkTaskRepository for WorkTaskRepositoryImpl {
    async fn enqueue(&self, task: &WorkTask) -> Result<WorkTask, RepositoryError> {
        let model: task_entity::ActiveModel = task.into();
        model.insert(self.db.as_ref()).await?;
        Ok(task.clone())
    }

    async fn acquire_next(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, RepositoryError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let task = task_entity::Entity::find()
            .filter(task_entity::Column::Queue.eq(queue.to_string()))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .filter(
                Condition::any()
                    .add(task_entity::Column::ScheduledAt.is_null())
                    .add(task_entity::Column::ScheduledAt.lte(now)),
            )
            .order_by_desc(task_entity::Column::Priority)
            .order_by_asc(task_entity::Column::CreatedAt)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?;

        let Some(task) = task else {
            txn.commit().await?;
            return Ok(None);
        };

        // 过期触发出队即取消，不执行
        let expired = task
            .expires_at
            .is_some_and(|at| at.with_timezone(&Utc) <= now);
        let mut active: task_entity::ActiveModel = task.into();

        if expired {
            active.status = Set(TaskStatus::Cancelled.to_string());
            active.completed_at = Set(Some(now.into()));
            active.updated_at = Set(now.into());
            active.update(&txn).await?;
            txn.commit().await?;
            return Ok(None);
        }

        active.lock_token = Set(Some(worker_id));
        active.lock_expires_at =
            Set(Some((now + Duration::minutes(LOCK_DURATION_MINUTES)).into()));
        active.status = Set(TaskStatus::Active.to_string());
        active.started_at = Set(Some(now.into()));
        let current_attempt = *active.attempt_count.as_ref();
        active.attempt_count = Set(current_attempt + 1);
        active.updated_at = Set(now.into());

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Ok(Some(updated.into()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WorkTask>, RepositoryError> {
        let model = task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(Into::into))
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_status(id, TaskStatus::Completed).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_status(id, TaskStatus::Failed).await
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_status(id, TaskStatus::Cancelled).await
    }

    async fn reschedule(
        &self,
        task: &WorkTask,
        at: DateTime<Utc>,
    ) -> Result<WorkTask, RepositoryError> {
        let model = task_entity::Entity::find_by_id(task.id)
            .one(self.db.as_ref())
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let mut active: task_entity::ActiveModel = model.into();
        active.status = Set(TaskStatus::Queued.to_string());
        active.scheduled_at = Set(Some(at.into()));
        active.lock_token = Set(None);
        active.lock_expires_at = Set(None);
        active.started_at = Set(None);
        active.completed_at = Set(None);
        active.updated_at = Set(Utc::now().into());

        let updated = active.update(self.db.as_ref()).await?;
        Ok(updated.into())
    }

    async fn reset_stuck(&self, timeout: Duration) -> Result<u64, RepositoryError> {
        let threshold = Utc::now() - timeout;

        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Queued.to_string()),
            )
            .col_expr(task_entity::Column::LockToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                task_entity::Column::LockExpiresAt,
                Expr::value(Option::<DateTime<chrono::FixedOffset>>::None),
            )
            .filter(task_entity::Column::Status.eq(TaskStatus::Active.to_string()))
            .filter(
                Condition::any()
                    .add(task_entity::Column::LockExpiresAt.lte(Utc::now()))
                    .add(
                        Condition::all()
                            .add(task_entity::Column::LockExpiresAt.is_null())
                            .add(task_entity::Column::StartedAt.lte(threshold)),
                    ),
            )
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn expire_overdue(&self) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let result = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::Status,
                Expr::value(TaskStatus::Cancelled.to_string()),
            )
            .col_expr(
                task_entity::Column::CompletedAt,
                Expr::value::<Option<DateTime<chrono::FixedOffset>>>(Some(now.into())),
            )
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .filter(task_entity::Column::ExpiresAt.lte(now))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected)
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<u64, RepositoryError> {
        let count = task_entity::Entity::find()
            .filter(task_entity::Column::Queue.eq(queue.to_string()))
            .filter(task_entity::Column::Status.eq(TaskStatus::Queued.to_string()))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }
}
