// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::models::crawler_config::EngineKind;

/// 尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Cancelled,
}

/// 尝试失败的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    Timeout,
    Http4xx,
    Http5xx,
    JavascriptError,
    ProxyError,
    Other,
}

impl fmt::Display for AttemptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttemptErrorKind::Timeout => write!(f, "timeout"),
            AttemptErrorKind::Http4xx => write!(f, "http_4xx"),
            AttemptErrorKind::Http5xx => write!(f, "http_5xx"),
            AttemptErrorKind::JavascriptError => write!(f, "javascript_error"),
            AttemptErrorKind::ProxyError => write!(f, "proxy_error"),
            AttemptErrorKind::Other => write!(f, "other"),
        }
    }
}

/// 单次尝试的历史记录，存储在爬虫执行作业内
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    pub attempt: u32,
    pub engine: EngineKind,
    pub use_proxy: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: AttemptStatus,
    #[serde(default)]
    pub error_type: Option<AttemptErrorKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub duration_seconds: f64,
}

/// 爬虫执行元数据（JSON blob）
///
/// fire_instant 用于触发去重；engine_used/proxy_used 记录最终
/// 成功尝试的配置，终态失败时记录最后一次尝试的配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionMeta {
    #[serde(default)]
    pub fire_instant: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engine_used: Option<EngineKind>,
    #[serde(default)]
    pub proxy_used: Option<bool>,
    #[serde(default)]
    pub retry_history: Vec<RetryHistoryEntry>,
    #[serde(default)]
    pub files_downloaded: u64,
    #[serde(default)]
    pub files_failed: u64,
    #[serde(default)]
    pub files_skipped: u64,
    #[serde(default)]
    pub bytes_downloaded: u64,
}

impl ExecutionMeta {
    pub fn new(fire_instant: DateTime<Utc>) -> Self {
        Self {
            fire_instant: Some(fire_instant),
            ..Default::default()
        }
    }
}
