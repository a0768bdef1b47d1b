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
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::crawler_config::CrawlerConfig;
use crate::domain::models::crawler_schedule::CrawlerSchedule;
use crate::domain::models::retry_history::ExecutionMeta;
use crate::utils::errors::truncate_error;

/// 作业实体
///
/// 单表多态：job_type 区分转换流水线作业（main/split/page/merge）
/// 与爬虫作业（crawler）；爬虫执行是 parent_job_id 指向爬虫的 crawler 行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 作业唯一标识符
    pub id: Uuid,
    /// 所属用户ID
    pub user_id: Uuid,
    /// 作业类型
    pub job_type: JobType,
    /// 作业状态
    pub status: JobStatus,
    /// 进度 [0,100]，单次执行内单调不减（对外始终报告观测到的最大值）
    pub progress: i32,
    /// 来源类型
    pub source_type: SourceType,
    /// 来源URL
    pub source_url: Option<String>,
    /// 规范化URL通配模式，用于相似作业检测
    pub url_pattern: Option<String>,
    /// 作业名称
    pub name: String,
    /// 父作业ID（只向上引用，遍历走仓库）
    pub parent_job_id: Option<Uuid>,
    /// 错误信息
    pub error: Option<String>,
    /// 总页数
    pub total_pages: i32,
    /// 已完成页数
    pub pages_completed: i32,
    /// 失败页数
    pub pages_failed: i32,
    /// 上传物存储路径
    pub storage_upload_path: Option<String>,
    /// 结果存储路径
    pub storage_result_path: Option<String>,
    /// 爬虫配置（crawler作业及其执行必填）
    pub crawler_config: Option<CrawlerConfig>,
    /// 爬虫调度（仅crawler作业）
    pub crawler_schedule: Option<CrawlerSchedule>,
    /// 执行元数据（仅爬虫执行：fire_instant、引擎、重试历史、计数）
    pub execution_meta: Option<ExecutionMeta>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 更新时间（乐观并发版本）
    pub updated_at: DateTime<Utc>,
}

/// 作业类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// 文档转换主作业
    #[default]
    Main,
    /// PDF拆分作业
    Split,
    /// 单页转换作业
    Page,
    /// 合并作业
    Merge,
    /// 爬虫作业（含执行子作业）
    Crawler,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobType::Main => write!(f, "main"),
            JobType::Split => write!(f, "split"),
            JobType::Page => write!(f, "page"),
            JobType::Merge => write!(f, "merge"),
            JobType::Crawler => write!(f, "crawler"),
        }
    }
}

impl FromStr for JobType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(JobType::Main),
            "split" => Ok(JobType::Split),
            "page" => Ok(JobType::Page),
            "merge" => Ok(JobType::Merge),
            "crawler" => Ok(JobType::Crawler),
            _ => Err(()),
        }
    }
}

/// 来源类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// 上传文件
    #[default]
    File,
    /// URL下载
    Url,
    /// Google Drive
    Gdrive,
    /// Dropbox
    Dropbox,
    /// 爬虫
    Crawler,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Url => write!(f, "url"),
            SourceType::Gdrive => write!(f, "gdrive"),
            SourceType::Dropbox => write!(f, "dropbox"),
            SourceType::Crawler => write!(f, "crawler"),
        }
    }
}

impl FromStr for SourceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SourceType::File),
            "url" => Ok(SourceType::Url),
            "gdrive" => Ok(SourceType::Gdrive),
            "dropbox" => Ok(SourceType::Dropbox),
            "crawler" => Ok(SourceType::Crawler),
            _ => Err(()),
        }
    }
}

/// 作业状态枚举
///
/// active/paused/stopped 仅用于 crawler 作业本体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 已入队
    #[default]
    Queued,
    /// 处理中
    Processing,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
    /// 已取消
    Cancelled,
    /// 爬虫激活（可调度）
    Active,
    /// 爬虫暂停
    Paused,
    /// 爬虫终止（不可恢复）
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "stopped" => Ok(JobStatus::Stopped),
            _ => Err(()),
        }
    }
}

impl JobStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Stopped
        )
    }

    /// 状态机：判断到目标状态的转换是否合法
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
                | (JobStatus::Active, JobStatus::Paused)
                | (JobStatus::Active, JobStatus::Stopped)
                | (JobStatus::Paused, JobStatus::Active)
                | (JobStatus::Paused, JobStatus::Stopped)
        )
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    /// 实体校验失败
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl Job {
    /// 创建文档转换主作业
    pub fn new_main(user_id: Uuid, source_type: SourceType, name: String) -> Self {
        Self::base(user_id, JobType::Main, source_type, name, None)
    }

    /// 创建流水线子作业（split/page/merge），父作业为main
    pub fn new_child(parent: &Job, job_type: JobType, name: String) -> Self {
        Self::base(
            parent.user_id,
            job_type,
            parent.source_type,
            name,
            Some(parent.id),
        )
    }

    /// 创建爬虫作业
    ///
    /// 初始状态为 Active（可调度）；配置与调度校验在值对象内完成
    pub fn new_crawler(
        user_id: Uuid,
        source_url: String,
        url_pattern: String,
        name: String,
        config: CrawlerConfig,
        schedule: CrawlerSchedule,
    ) -> Self {
        let mut job = Self::base(user_id, JobType::Crawler, SourceType::Crawler, name, None);
        job.status = JobStatus::Active;
        job.source_url = Some(source_url);
        job.url_pattern = Some(url_pattern);
        job.crawler_config = Some(config);
        job.crawler_schedule = Some(schedule);
        job
    }

    /// 为爬虫创建一次执行子作业
    ///
    /// 携带配置快照与 fire_instant；同一 (crawler, fire_instant)
    /// 的重复执行由调用方在创建前去重
    pub fn new_execution(crawler: &Job, fire_instant: DateTime<Utc>) -> Self {
        let mut job = Self::base(
            crawler.user_id,
            JobType::Crawler,
            SourceType::Crawler,
            format!("{} - execution {}", crawler.name, fire_instant.to_rfc3339()),
            Some(crawler.id),
        );
        job.source_url = crawler.source_url.clone();
        job.crawler_config = crawler.crawler_config.clone();
        job.execution_meta = Some(ExecutionMeta::new(fire_instant));
        job
    }

    fn base(
        user_id: Uuid,
        job_type: JobType,
        source_type: SourceType,
        name: String,
        parent_job_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            job_type,
            status: JobStatus::Queued,
            progress: 0,
            source_type,
            source_url: None,
            url_pattern: None,
            name,
            parent_job_id,
            error: None,
            total_pages: 0,
            pages_completed: 0,
            pages_failed: 0,
            storage_upload_path: None,
            storage_result_path: None,
            crawler_config: None,
            crawler_schedule: None,
            execution_meta: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// 是否为爬虫执行（而非爬虫本体）
    pub fn is_execution(&self) -> bool {
        self.job_type == JobType::Crawler && self.parent_job_id.is_some()
    }

    /// 是否处于终态
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 开始处理
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// 完成
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.progress = 100;
        Ok(())
    }

    /// 失败
    pub fn fail(&mut self, message: &str) -> Result<(), DomainError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(truncate_error(message));
        Ok(())
    }

    /// 取消
    ///
    /// 对已终态作业是幂等no-op
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Ok(());
        }
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 暂停爬虫调度
    pub fn pause(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Paused)
    }

    /// 恢复爬虫调度
    pub fn resume(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Active)
    }

    /// 永久停止爬虫（终态，需新建爬虫才能再次调度）
    pub fn stop(&mut self) -> Result<(), DomainError> {
        self.transition(JobStatus::Stopped)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 记录进度
    ///
    /// 对外进度只增不减；重试时单次尝试内部进度归零由tracker处理
    pub fn record_progress(&mut self, progress: i32) {
        let clamped = progress.clamp(0, 100);
        if clamped > self.progress {
            self.progress = clamped;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_job() -> Job {
        Job::new_main(Uuid::new_v4(), SourceType::File, "doc.pdf".to_string())
    }

    #[test]
    fn test_pipeline_lifecycle() {
        let mut job = main_job();
        assert_eq!(job.status, JobStatus::Queued);

        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut job = main_job();
        // queued -> completed 不允许
        assert!(job.complete().is_err());

        job.start().unwrap();
        job.fail("boom").unwrap();
        // failed 为终态
        assert!(job.start().is_err());
    }

    #[test]
    fn test_cancel_is_idempotent_on_terminal() {
        let mut job = main_job();
        job.start().unwrap();
        job.complete().unwrap();

        // 对终态作业取消是no-op并成功返回
        assert!(job.cancel().is_ok());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_cancel_before_pickup() {
        let mut job = main_job();
        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_crawler_pause_resume_stop() {
        let mut job = main_job();
        job.status = JobStatus::Active;

        job.pause().unwrap();
        assert_eq!(job.status, JobStatus::Paused);

        job.resume().unwrap();
        assert_eq!(job.status, JobStatus::Active);

        job.stop().unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert!(job.is_terminal());
        assert!(job.resume().is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = main_job();
        job.record_progress(40);
        job.record_progress(20);
        assert_eq!(job.progress, 40);
        job.record_progress(70);
        assert_eq!(job.progress, 70);
        job.record_progress(150);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_error_message_truncated() {
        let mut job = main_job();
        job.start().unwrap();
        let huge = "e".repeat(20_000);
        job.fail(&huge).unwrap();
        assert!(job.error.as_ref().unwrap().len() < 9 * 1024);
    }
}
