// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

/// 核心错误类型
///
/// 按照处理策略分类：InvalidInput/NotFound 直接返回调用方，
/// Conflict 在内部有限重试，Transient 带退避重试，
/// Fatal 标记任务失败，Cancelled 由用户或监控触发
#[derive(Error, Debug)]
pub enum CoreError {
    /// 输入无效（URL、cron表达式、配置等），不重试
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),

    /// 乐观并发冲突，内部重试耗尽后上抛
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 瞬时错误（网络、5xx、408/429、存储503），带退避重试
    #[error("Transient error: {0}")]
    Transient(String),

    /// 致命错误（损坏输入、不支持的格式），标记任务失败
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// 已取消
    #[error("Cancelled")]
    Cancelled,
}

impl CoreError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Conflict(_))
    }
}

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Domain error: {0}")]
    DomainError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// 截断错误消息，避免超长堆栈写满 error 列
///
/// 消息上限 8 KB，截断时保留前缀并标注
pub fn truncate_error(message: &str) -> String {
    const MAX_ERROR_BYTES: usize = 8 * 1024;

    if message.len() <= MAX_ERROR_BYTES {
        return message.to_string();
    }

    let mut end = MAX_ERROR_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_short_message() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn test_truncate_error_long_message() {
        let long = "x".repeat(10_000);
        let truncated = truncate_error(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("[truncated]"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CoreError::Transient("503".into()).is_retryable());
        assert!(CoreError::Conflict("version".into()).is_retryable());
        assert!(!CoreError::InvalidInput("bad cron".into()).is_retryable());
        assert!(!CoreError::Fatal("corrupt".into()).is_retryable());
    }
}
