// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// 索引错误类型
///
/// 索引写入失败从不让作业失败：记录日志，下次flush重试
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index write failed: {0}")]
    WriteFailed(String),

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

/// 进度索引的三个逻辑流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexStream {
    /// 终态转换与完成快照，保留≥90天
    JobEvents,
    /// 执行期间的周期采样，按日滚动，7天后可删除
    ExecutionMetrics,
    /// 每次尝试一条（引擎/代理/结果）
    RetryMetrics,
}

impl fmt::Display for IndexStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IndexStream::JobEvents => write!(f, "job-events"),
            IndexStream::ExecutionMetrics => write!(f, "execution-metrics"),
            IndexStream::RetryMetrics => write!(f, "retry-metrics"),
        }
    }
}

/// 带流标签的索引文档
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub stream: IndexStream,
    pub body: Value,
}

/// 进度索引接口
///
/// 追加型近实时视图（写入5秒内可见）；纯观测用，
/// 永不参与作业进度或完成判定
#[async_trait]
pub trait ProgressIndexer: Send + Sync {
    /// 批量写入一组文档
    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<(), IndexError>;
}
