// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::job::{DomainError, Job, JobStatus, JobType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 乐观并发冲突
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for RepositoryError {
    fn from(e: DomainError) -> Self {
        RepositoryError::Internal(e.to_string())
    }
}

/// 作业查询参数
#[derive(Debug, Default, Clone)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: u64,
    pub offset: u64,
}

/// 作业仓库特质
///
/// 作业行是锁单元：update 以 updated_at 做CAS，
/// 冲突返回 Conflict，由 update_with_retry 重试读-改-写
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建作业
    async fn create(&self, job: &Job) -> Result<Job, RepositoryError>;
    /// 根据ID查找作业
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError>;
    /// 乐观并发更新
    ///
    /// 仅当行上的 updated_at 仍等于 expected_updated_at 时写入，
    /// 否则返回 Conflict
    async fn update(
        &self,
        job: &Job,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Job, RepositoryError>;
    /// 删除作业并级联删除子作业、页面与爬取文件行
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// 按用户列出作业，created_at 倒序
    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<(Vec<Job>, u64), RepositoryError>;
    /// 查找子作业
    async fn find_children(&self, parent_job_id: Uuid) -> Result<Vec<Job>, RepositoryError>;
    /// 按用户查找爬虫作业
    async fn find_crawler_jobs(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<Vec<Job>, RepositoryError>;
    /// 调度器重建：所有active爬虫（走 (job_type, status) 复合索引）
    async fn find_active_crawlers(&self) -> Result<Vec<Job>, RepositoryError>;
    /// 爬虫的执行历史，最新在前
    async fn find_crawler_executions(&self, crawler_id: Uuid)
        -> Result<Vec<Job>, RepositoryError>;
    /// 按计划触发时刻查找执行（触发幂等去重）
    async fn find_execution_by_fire_instant(
        &self,
        crawler_id: Uuid,
        fire_instant: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError>;
    /// 相似作业检测：非终态作业中 url_pattern 精确或编辑距离≤2匹配
    ///
    /// 永不阻塞创建，结果作为警告附加
    async fn find_similar(&self, url_pattern: &str) -> Result<Vec<Job>, RepositoryError>;
    /// 卡死检测：processing状态且started_at早于阈值的作业
    async fn find_stuck(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, RepositoryError>;
}

/// CAS更新的内部重试上限
const UPDATE_RETRIES: usize = 3;

/// 读-改-写并在冲突时重试
///
/// 最多重试3次，之后上抛Conflict
pub async fn update_with_retry<R, F>(
    repo: &R,
    id: Uuid,
    mut mutate: F,
) -> Result<Job, RepositoryError>
where
    R: JobRepository + ?Sized,
    F: FnMut(&mut Job) -> Result<(), DomainError>,
{
    let mut last_conflict = None;

    for _ in 0..UPDATE_RETRIES {
        let mut job = repo.find_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        let expected = job.updated_at;
        mutate(&mut job)?;
        job.updated_at = Utc::now();

        match repo.update(&job, expected).await {
            Ok(updated) => return Ok(updated),
            Err(RepositoryError::Conflict(message)) => {
                last_conflict = Some(message);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(RepositoryError::Conflict(
        last_conflict.unwrap_or_else(|| "update retries exhausted".to_string()),
    ))
}
