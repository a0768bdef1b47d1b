// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::work_task::{QueueName, WorkTask};
use crate::domain::repositories::job_repository::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// 工作队列仓库特质
///
/// acquire_next 用 FOR UPDATE SKIP LOCKED 语义抢占：
/// 设置锁令牌与锁过期，状态置Active；过期任务出队时直接取消
#[async_trait]
pub trait WorkTaskRepository: Send + Sync {
    /// 入队任务
    async fn enqueue(&self, task: &WorkTask) -> Result<WorkTask, RepositoryError>;
    /// 按队列抢占下一个可执行任务
    async fn acquire_next(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, RepositoryError>;
    /// 根据ID查找任务
    async fn find_by_id(&self, id: Uuid) -> Result<Option<WorkTask>, RepositoryError>;
    /// 迟到ack：效果提交后标记完成
    async fn mark_completed(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// 标记失败
    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// 标记取消（过期触发、爬虫已暂停等）
    async fn mark_cancelled(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// 失败任务延迟重新入队
    async fn reschedule(
        &self,
        task: &WorkTask,
        at: DateTime<Utc>,
    ) -> Result<WorkTask, RepositoryError>;
    /// 重置锁过期的Active任务（崩溃worker回收）
    async fn reset_stuck(&self, timeout: Duration) -> Result<u64, RepositoryError>;
    /// 取消已过TTL的队列任务
    async fn expire_overdue(&self) -> Result<u64, RepositoryError>;
    /// 队列深度（背压判定）
    async fn queue_depth(&self, queue: QueueName) -> Result<u64, RepositoryError>;
}
