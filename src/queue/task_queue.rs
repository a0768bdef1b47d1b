// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::work_task::{QueueName, WorkTask};
use crate::domain::repositories::job_repository::RepositoryError;
use crate::domain::repositories::work_task_repository::WorkTaskRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 仓库错误
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// 任务队列特质
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队任务
    async fn enqueue(&self, task: WorkTask) -> Result<WorkTask, QueueError>;

    /// 出队任务（按队列抢占）
    async fn dequeue(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, QueueError>;

    /// 完成任务（迟到ack）
    async fn complete(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// 失败任务
    async fn fail(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// 取消任务
    async fn cancel(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// 延迟重新入队
    async fn reschedule(&self, task: &WorkTask, at: DateTime<Utc>)
        -> Result<WorkTask, QueueError>;

    /// 队列深度
    async fn depth(&self, queue: QueueName) -> Result<u64, QueueError>;
}

/// 数据库承载的任务队列实现
pub struct DbTaskQueue<R: WorkTaskRepository + ?Sized> {
    repository: Arc<R>,
}

impl<R: WorkTaskRepository + ?Sized> DbTaskQueue<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: WorkTaskRepository + ?Sized> TaskQueue for DbTaskQueue<R> {
    async fn enqueue(&self, task: WorkTask) -> Result<WorkTask, QueueError> {
        Ok(self.repository.enqueue(&task).await?)
    }

    async fn dequeue(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, QueueError> {
        Ok(self.repository.acquire_next(queue, worker_id).await?)
    }

    async fn complete(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(self.repository.mark_completed(task_id).await?)
    }

    async fn fail(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(self.repository.mark_failed(task_id).await?)
    }

    async fn cancel(&self, task_id: Uuid) -> Result<(), QueueError> {
        Ok(self.repository.mark_cancelled(task_id).await?)
    }

    async fn reschedule(
        &self,
        task: &WorkTask,
        at: DateTime<Utc>,
    ) -> Result<WorkTask, QueueError> {
        Ok(self.repository.reschedule(task, at).await?)
    }

    async fn depth(&self, queue: QueueName) -> Result<u64, QueueError> {
        Ok(self.repository.queue_depth(queue).await?)
    }
}

#[async_trait]
impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    async fn enqueue(&self, task: WorkTask) -> Result<WorkTask, QueueError> {
        (**self).enqueue(task).await
    }

    async fn dequeue(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, QueueError> {
        (**self).dequeue(queue, worker_id).await
    }

    async fn complete(&self, task_id: Uuid) -> Result<(), QueueError> {
        (**self).complete(task_id).await
    }

    async fn fail(&self, task_id: Uuid) -> Result<(), QueueError> {
        (**self).fail(task_id).await
    }

    async fn cancel(&self, task_id: Uuid) -> Result<(), QueueError> {
        (**self).cancel(task_id).await
    }

    async fn reschedule(
        &self,
        task: &WorkTask,
        at: DateTime<Utc>,
    ) -> Result<WorkTask, QueueError> {
        (**self).reschedule(task, at).await
    }

    async fn depth(&self, queue: QueueName) -> Result<u64, QueueError> {
        (**self).depth(queue).await
    }
}
