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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 任务种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 拆分PDF为单页
    SplitPdf,
    /// 转换单页
    ConvertPage,
    /// 合并页面结果
    MergePages,
    /// 执行一次爬虫
    ExecuteCrawler,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskKind::SplitPdf => write!(f, "split_pdf"),
            TaskKind::ConvertPage => write!(f, "convert_page"),
            TaskKind::MergePages => write!(f, "merge_pages"),
            TaskKind::ExecuteCrawler => write!(f, "execute_crawler"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "split_pdf" => Ok(TaskKind::SplitPdf),
            "convert_page" => Ok(TaskKind::ConvertPage),
            "merge_pages" => Ok(TaskKind::MergePages),
            "execute_crawler" => Ok(TaskKind::ExecuteCrawler),
            _ => Err(()),
        }
    }
}

impl TaskKind {
    /// 任务种类到队列的路由
    pub fn queue(&self) -> QueueName {
        match self {
            TaskKind::SplitPdf | TaskKind::ConvertPage | TaskKind::MergePages => {
                QueueName::Conversion
            }
            TaskKind::ExecuteCrawler => QueueName::Crawler,
        }
    }
}

/// 队列名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Conversion,
    Crawler,
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueueName::Conversion => write!(f, "conversion"),
            QueueName::Crawler => write!(f, "crawler"),
        }
    }
}

impl FromStr for QueueName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversion" => Ok(QueueName::Conversion),
            "crawler" => Ok(QueueName::Crawler),
            _ => Err(()),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Active => write!(f, "active"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// 工作队列任务
///
/// 数据库承载的工作队列行：worker用锁令牌+锁过期抢占，
/// 迟到ack（效果落库后才标记完成），崩溃worker的任务
/// 随锁过期被重新投递
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub queue: QueueName,
    /// 任务负载（job id、页码、fire_instant等）
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: i32,
    pub attempt_count: i32,
    pub max_retries: i32,
    /// 延迟执行时刻；None表示立即可取
    pub scheduled_at: Option<DateTime<Utc>>,
    /// 触发TTL：过期任务在出队时被丢弃而非执行
    pub expires_at: Option<DateTime<Utc>>,
    pub lock_token: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkTask {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            queue: kind.queue(),
            payload,
            status: TaskStatus::Queued,
            priority: 0,
            attempt_count: 0,
            max_retries: 3,
            scheduled_at: None,
            expires_at: None,
            lock_token: None,
            lock_expires_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// 延迟到某时刻执行
    pub fn delayed_until(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// 设置TTL
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// 任务是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// 是否还可重试
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_retries
    }
}

/// split_pdf任务负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitPdfPayload {
    pub main_job_id: Uuid,
    pub split_job_id: Uuid,
}

/// convert_page任务负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertPagePayload {
    pub main_job_id: Uuid,
    pub page_job_id: Uuid,
    pub page_number: i32,
}

/// merge_pages任务负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePagesPayload {
    pub main_job_id: Uuid,
    pub merge_job_id: Uuid,
}

/// execute_crawler任务负载（调度触发）
///
/// fire_instant用于执行幂等去重：同一 (crawler, fire_instant)
/// 只产生一行执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCrawlerPayload {
    pub crawler_job_id: Uuid,
    pub fire_instant: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_routes_to_queue() {
        assert_eq!(TaskKind::SplitPdf.queue(), QueueName::Conversion);
        assert_eq!(TaskKind::ConvertPage.queue(), QueueName::Conversion);
        assert_eq!(TaskKind::MergePages.queue(), QueueName::Conversion);
        assert_eq!(TaskKind::ExecuteCrawler.queue(), QueueName::Crawler);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let task = WorkTask::new(TaskKind::ExecuteCrawler, json!({}))
            .expiring_at(now - chrono::Duration::seconds(1));
        assert!(task.is_expired(now));

        let live = WorkTask::new(TaskKind::ExecuteCrawler, json!({}))
            .expiring_at(now + chrono::Duration::hours(1));
        assert!(!live.is_expired(now));
    }
}
