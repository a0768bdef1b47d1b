// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::crawled_file::{CrawledFile, FileStatus};
use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::models::page::Page;
use crate::domain::models::work_task::{QueueName, TaskStatus, WorkTask};
use crate::domain::repositories::crawled_file_repository::{CrawledFileRepository, FileCounts};
use crate::domain::repositories::job_repository::{JobQuery, JobRepository, RepositoryError};
use crate::domain::repositories::page_repository::{PageCounts, PageRepository};
use crate::domain::repositories::work_task_repository::WorkTaskRepository;
use crate::domain::services::duplicate_detector;

/// 内存版数据存储
///
/// 实现全部仓库特质，用于单元/集成测试与本地运行；
/// 语义与SeaORM实现对齐（CAS、级联删除、队列锁）
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    pages: RwLock<HashMap<Uuid, Page>>,
    files: RwLock<HashMap<Uuid, CrawledFile>>,
    tasks: RwLock<HashMap<Uuid, WorkTask>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn create(&self, job: &Job) -> Result<Job, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::Internal(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        job: &Job,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Job, RepositoryError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&job.id).ok_or(RepositoryError::NotFound)?;

        if current.updated_at != expected_updated_at {
            return Err(RepositoryError::Conflict(format!(
                "job {} changed concurrently",
                job.id
            )));
        }

        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }

        // 级联：子作业、页面行、爬取文件行
        let children: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.parent_job_id == Some(id))
            .map(|j| j.id)
            .collect();
        for child in &children {
            jobs.remove(child);
        }
        drop(jobs);

        let mut pages = self.pages.write().await;
        pages.retain(|_, p| p.job_id != id);
        drop(pages);

        let mut files = self.files.write().await;
        files.retain(|_, f| f.execution_id != id && !children.contains(&f.execution_id));

        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<(Vec<Job>, u64), RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| j.user_id == user_id && j.parent_job_id.is_none())
            .filter(|j| query.status.is_none_or(|s| j.status == s))
            .filter(|j| query.job_type.is_none_or(|t| j.job_type == t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        let limit = if query.limit == 0 { 50 } else { query.limit } as usize;
        let page: Vec<Job> = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect();
        Ok((page, total))
    }

    async fn find_children(&self, parent_job_id: Uuid) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut children: Vec<Job> = jobs
            .values()
            .filter(|j| j.parent_job_id == Some(parent_job_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }

    async fn find_crawler_jobs(
        &self,
        user_id: Uuid,
        query: JobQuery,
    ) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| {
                j.user_id == user_id
                    && j.job_type == JobType::Crawler
                    && j.parent_job_id.is_none()
            })
            .filter(|j| query.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_active_crawlers(&self) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| {
                j.job_type == JobType::Crawler
                    && j.status == JobStatus::Active
                    && j.parent_job_id.is_none()
            })
            .cloned()
            .collect())
    }

    async fn find_crawler_executions(
        &self,
        crawler_id: Uuid,
    ) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        let mut executions: Vec<Job> = jobs
            .values()
            .filter(|j| j.parent_job_id == Some(crawler_id) && j.job_type == JobType::Crawler)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn find_execution_by_fire_instant(
        &self,
        crawler_id: Uuid,
        fire_instant: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError> {
        let executions = self.find_crawler_executions(crawler_id).await?;
        Ok(executions.into_iter().find(|job| {
            job.execution_meta
                .as_ref()
                .and_then(|meta| meta.fire_instant)
                == Some(fire_instant)
        }))
    }

    async fn find_similar(&self, url_pattern: &str) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .filter(|j| {
                j.url_pattern
                    .as_deref()
                    .is_some_and(|p| duplicate_detector::patterns_match(url_pattern, p))
            })
            .cloned()
            .collect())
    }

    async fn find_stuck(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Processing
                    && j.started_at.is_some_and(|at| at <= started_before)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PageRepository for InMemoryStore {
    async fn upsert_pages(&self, new_pages: &[Page]) -> Result<(), RepositoryError> {
        let mut pages = self.pages.write().await;
        for page in new_pages {
            // (job_id, page_number) 唯一：替换既有行
            let existing = pages
                .values()
                .find(|p| p.job_id == page.job_id && p.page_number == page.page_number)
                .map(|p| p.id);
            if let Some(id) = existing {
                pages.remove(&id);
            }
            pages.insert(page.id, page.clone());
        }
        Ok(())
    }

    async fn get_pages(
        &self,
        job_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Page>, RepositoryError> {
        let pages = self.pages.read().await;
        let mut matched: Vec<Page> = pages
            .values()
            .filter(|p| p.job_id == job_id)
            .cloned()
            .collect();
        matched.sort_by_key(|p| p.page_number);

        let limit = if limit == 0 { 100 } else { limit } as usize;
        Ok(matched
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect())
    }

    async fn find_page(
        &self,
        job_id: Uuid,
        page_number: i32,
    ) -> Result<Option<Page>, RepositoryError> {
        let pages = self.pages.read().await;
        Ok(pages
            .values()
            .find(|p| p.job_id == job_id && p.page_number == page_number)
            .cloned())
    }

    async fn update_page(&self, page: &Page) -> Result<Page, RepositoryError> {
        let mut pages = self.pages.write().await;
        if !pages.contains_key(&page.id) {
            return Err(RepositoryError::NotFound);
        }
        pages.insert(page.id, page.clone());
        Ok(page.clone())
    }

    async fn count_by_status(&self, job_id: Uuid) -> Result<PageCounts, RepositoryError> {
        let pages = self.pages.read().await;
        let mut counts = PageCounts::default();
        for page in pages.values().filter(|p| p.job_id == job_id) {
            counts.total += 1;
            match page.status {
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                s if !s.is_terminal() => counts.non_terminal += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn last_terminal_transition(
        &self,
        job_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let pages = self.pages.read().await;
        Ok(pages
            .values()
            .filter(|p| p.job_id == job_id && p.is_terminal())
            .map(|p| p.updated_at)
            .max())
    }

    async fn delete_by_job(&self, job_id: Uuid) -> Result<u64, RepositoryError> {
        let mut pages = self.pages.write().await;
        let before = pages.len();
        pages.retain(|_, p| p.job_id != job_id);
        Ok((before - pages.len()) as u64)
    }
}

#[async_trait]
impl CrawledFileRepository for InMemoryStore {
    async fn create(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError> {
        let mut files = self.files.write().await;
        files.insert(file.id, file.clone());
        Ok(file.clone())
    }

    async fn update(&self, file: &CrawledFile) -> Result<CrawledFile, RepositoryError> {
        let mut files = self.files.write().await;
        if !files.contains_key(&file.id) {
            return Err(RepositoryError::NotFound);
        }
        files.insert(file.id, file.clone());
        Ok(file.clone())
    }

    async fn list_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<CrawledFile>, RepositoryError> {
        let files = self.files.read().await;
        let mut matched: Vec<CrawledFile> = files
            .values()
            .filter(|f| f.execution_id == execution_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn count_by_status(&self, execution_id: Uuid) -> Result<FileCounts, RepositoryError> {
        let files = self.files.read().await;
        let mut counts = FileCounts::default();
        for file in files.values().filter(|f| f.execution_id == execution_id) {
            counts.total += 1;
            match file.status {
                FileStatus::Downloaded => counts.downloaded += 1,
                FileStatus::Failed => counts.failed += 1,
                FileStatus::Skipped => counts.skipped += 1,
                FileStatus::Pending => {}
            }
        }
        Ok(counts)
    }

    async fn delete_by_execution(&self, execution_id: Uuid) -> Result<u64, RepositoryError> {
        let mut files = self.files.write().await;
        let before = files.len();
        files.retain(|_, f| f.execution_id != execution_id);
        Ok((before - files.len()) as u64)
    }
}

#[async_trait]
impl WorkTaskRepository for InMemoryStore {
    async fn enqueue(&self, task: &WorkTask) -> Result<WorkTask, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn acquire_next(
        &self,
        queue: QueueName,
        worker_id: Uuid,
    ) -> Result<Option<WorkTask>, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();

        let mut candidates: Vec<&WorkTask> = tasks
            .values()
            .filter(|t| t.queue == queue && t.status == TaskStatus::Queued)
            .filter(|t| t.scheduled_at.is_none_or(|at| at <= now))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let Some(id) = candidates.first().map(|t| t.id) else {
            return Ok(None);
        };
        let task = tasks.get_mut(&id).expect("candidate id present");

        if task.is_expired(now) {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
            task.updated_at = now;
            return Ok(None);
        }

        task.status = TaskStatus::Active;
        task.lock_token = Some(worker_id);
        task.lock_expires_at = Some(now + Duration::minutes(60));
        task.started_at = Some(now);
        task.attempt_count += 1;
        task.updated_at = now;

        Ok(Some(task.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<WorkTask>, RepositoryError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_task_status(id, TaskStatus::Completed).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_task_status(id, TaskStatus::Failed).await
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.set_task_status(id, TaskStatus::Cancelled).await
    }

    async fn reschedule(
        &self,
        task: &WorkTask,
        at: DateTime<Utc>,
    ) -> Result<WorkTask, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks.get_mut(&task.id).ok_or(RepositoryError::NotFound)?;

        stored.status = TaskStatus::Queued;
        stored.scheduled_at = Some(at);
        stored.lock_token = None;
        stored.lock_expires_at = None;
        stored.started_at = None;
        stored.completed_at = None;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn reset_stuck(&self, timeout: Duration) -> Result<u64, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();
        let threshold = now - timeout;
        let mut reset = 0;

        for task in tasks.values_mut() {
            if task.status != TaskStatus::Active {
                continue;
            }
            let stuck = match task.lock_expires_at {
                Some(at) => at <= now,
                None => task.started_at.is_some_and(|at| at <= threshold),
            };
            if stuck {
                task.status = TaskStatus::Queued;
                task.lock_token = None;
                task.lock_expires_at = None;
                task.updated_at = now;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn expire_overdue(&self) -> Result<u64, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let now = Utc::now();
        let mut expired = 0;

        for task in tasks.values_mut() {
            if task.status == TaskStatus::Queued && task.is_expired(now) {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
                task.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<u64, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.queue == queue && t.status == TaskStatus::Queued)
            .count() as u64)
    }
}

impl InMemoryStore {
    async fn set_task_status(&self, id: Uuid, status: TaskStatus) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.lock_token = None;
        task.lock_expires_at = None;
        task.updated_at = Utc::now();
        Ok(())
    }
}
