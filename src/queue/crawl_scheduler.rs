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

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::models::work_task::{ExecuteCrawlerPayload, TaskKind, WorkTask};
use crate::domain::repositories::job_repository::{
    update_with_retry, JobRepository, RepositoryError,
};
use crate::queue::task_queue::{QueueError, TaskQueue};

/// 没有待调度条目时的空转等待
const IDLE_WAIT_SECONDS: u64 = 60;

/// 触发TTL上限（秒）：迟到触发直接丢弃而不是堆积
const MAX_TRIGGER_TTL_SECONDS: i64 = 3600;

/// 调度器错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Schedule error: {0}")]
    Schedule(String),
}

/// 堆条目：按next_fire_time排序的最小堆
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduleEntry {
    fire_at: DateTime<Utc>,
    crawler_id: Uuid,
}

impl Ord for ScheduleEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.crawler_id.cmp(&other.crawler_id))
    }
}

impl PartialOrd for ScheduleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// 爬虫调度器
///
/// 唯一的瞬态状态是内存最小堆，重启后从 find_active_crawlers()
/// 重建；触发出队前以作业状态再校验，暂停/删除的爬虫触发被丢弃
pub struct CrawlScheduler {
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    entries: Mutex<BinaryHeap<Reverse<ScheduleEntry>>>,
    wakeup: Notify,
}

impl CrawlScheduler {
    pub fn new(jobs: Arc<dyn JobRepository>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            jobs,
            queue,
            entries: Mutex::new(BinaryHeap::new()),
            wakeup: Notify::new(),
        }
    }

    /// 重启重建：加载所有active爬虫并装入堆
    pub async fn rehydrate(&self) -> Result<usize, SchedulerError> {
        let crawlers = self.jobs.find_active_crawlers().await?;
        let now = Utc::now();
        let mut installed = 0;

        for crawler in &crawlers {
            if self.install(crawler, now)? {
                installed += 1;
            }
        }

        info!("scheduler rehydrated with {} active crawlers", installed);
        self.wakeup.notify_one();
        Ok(installed)
    }

    /// 注册爬虫（创建或恢复后调用）
    ///
    /// 计算下一次触发时间并持久化next_runs投影
    pub async fn register_crawler(&self, crawler_id: Uuid) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let job = update_with_retry(self.jobs.as_ref(), crawler_id, |job| {
            if let Some(schedule) = job.crawler_schedule.as_mut() {
                schedule.refresh_next_runs(now)?;
            }
            Ok(())
        })
        .await?;

        self.install(&job, now)?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// 更新爬虫调度（表达式/时区变更）
    pub async fn update_crawler(&self, crawler_id: Uuid) -> Result<(), SchedulerError> {
        // 旧堆条目在触发时按作业当前调度重新校验，直接装新条目即可
        self.remove_entries(crawler_id);
        self.register_crawler(crawler_id).await
    }

    /// 注销爬虫（删除/停止）
    pub fn unregister_crawler(&self, crawler_id: Uuid) {
        self.remove_entries(crawler_id);
        self.wakeup.notify_one();
    }

    /// 暂停爬虫：移除堆条目；队列中已有的触发在出队时被丢弃
    pub fn pause_crawler(&self, crawler_id: Uuid) {
        self.remove_entries(crawler_id);
        self.wakeup.notify_one();
    }

    fn remove_entries(&self, crawler_id: Uuid) {
        let mut entries = self.entries.lock();
        let remaining: BinaryHeap<Reverse<ScheduleEntry>> = entries
            .drain()
            .filter(|Reverse(e)| e.crawler_id != crawler_id)
            .collect();
        *entries = remaining;
    }

    /// 把爬虫的下一次触发装入堆；无后续触发返回false
    fn install(&self, job: &Job, after: DateTime<Utc>) -> Result<bool, SchedulerError> {
        if job.job_type != JobType::Crawler || job.status != JobStatus::Active {
            return Ok(false);
        }
        let Some(schedule) = &job.crawler_schedule else {
            return Ok(false);
        };

        let next = schedule
            .next_run_after(after)
            .map_err(|e| SchedulerError::Schedule(e.to_string()))?;

        if let Some(fire_at) = next {
            self.entries.lock().push(Reverse(ScheduleEntry {
                fire_at,
                crawler_id: job.id,
            }));
            return Ok(true);
        }
        Ok(false)
    }

    /// 处理now时刻所有到期条目，返回发出的触发数
    ///
    /// 循环体拆出便于测试；发射失败的条目回堆等待下次唤醒
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let mut emitted = 0;

        loop {
            let due = {
                let mut entries = self.entries.lock();
                match entries.peek() {
                    Some(Reverse(entry)) if entry.fire_at <= now => {
                        let Reverse(entry) = entries.pop().expect("peeked entry");
                        Some(entry)
                    }
                    _ => None,
                }
            };
            let Some(entry) = due else { break };

            match self.fire(&entry).await {
                Ok(fired) => {
                    if fired {
                        emitted += 1;
                    }
                }
                Err(e) => {
                    // 触发发射失败只记录，下次唤醒重试
                    error!(
                        "failed to emit trigger for crawler {}: {}",
                        entry.crawler_id, e
                    );
                    self.entries.lock().push(Reverse(ScheduleEntry {
                        fire_at: now + Duration::seconds(IDLE_WAIT_SECONDS as i64),
                        crawler_id: entry.crawler_id,
                    }));
                }
            }
        }

        Ok(emitted)
    }

    /// 发射单个触发并重装下一次
    async fn fire(&self, entry: &ScheduleEntry) -> Result<bool, SchedulerError> {
        let Some(job) = self.jobs.find_by_id(entry.crawler_id).await? else {
            warn!("crawler {} vanished, dropping trigger", entry.crawler_id);
            return Ok(false);
        };

        // 暂停/停止的爬虫不发射
        if job.status != JobStatus::Active {
            return Ok(false);
        }
        let Some(schedule) = job.crawler_schedule.clone() else {
            return Ok(false);
        };

        let max_ttl = Duration::seconds(MAX_TRIGGER_TTL_SECONDS);
        let period = schedule.period().unwrap_or(max_ttl);
        let ttl = period.min(max_ttl);

        let payload = ExecuteCrawlerPayload {
            crawler_job_id: job.id,
            fire_instant: entry.fire_at,
        };
        let task = WorkTask::new(
            TaskKind::ExecuteCrawler,
            serde_json::to_value(&payload)
                .map_err(|e| SchedulerError::Schedule(e.to_string()))?,
        )
        .expiring_at(entry.fire_at + ttl);

        self.queue.enqueue(task).await?;

        // 重复型：从本次fire时刻起装入下一次并持久化投影；
        // 晚到的边界照常发射，由TTL在出队侧丢弃。
        // 一次性：发射后自动注销（不再装入）
        if schedule.is_recurring() {
            let job = update_with_retry(self.jobs.as_ref(), entry.crawler_id, |job| {
                if let Some(schedule) = job.crawler_schedule.as_mut() {
                    schedule.refresh_next_runs(entry.fire_at)?;
                }
                Ok(())
            })
            .await?;
            self.install(&job, entry.fire_at)?;
        }

        Ok(true)
    }

    /// 启动调度循环
    ///
    /// 睡到最早的fire时刻，被注册/注销唤醒后重算
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                if let Err(e) = self.tick(now).await {
                    error!("scheduler tick failed: {}", e);
                }

                let next_fire = self
                    .entries
                    .lock()
                    .peek()
                    .map(|Reverse(entry)| entry.fire_at);

                let sleep_for = match next_fire {
                    Some(at) => (at - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO),
                    None => std::time::Duration::from_secs(IDLE_WAIT_SECONDS),
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = self.wakeup.notified() => {}
                }
            }
        })
    }
}
