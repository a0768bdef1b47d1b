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

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::models::crawler_config::{EngineKind, RetryStep};
use crate::domain::models::retry_history::{AttemptStatus, RetryHistoryEntry};
use crate::engines::traits::EngineError;

/// 单次尝试的执行方
///
/// 重试引擎是纯协调器：尝试内容（引擎构建、爬取流水线）
/// 由调用方实现；取消状态也由调用方从作业行读出
#[async_trait]
pub trait AttemptRunner: Send {
    /// 以固定的engine/proxy执行一次尝试
    async fn attempt(&mut self, step: &RetryStep) -> Result<(), EngineError>;

    /// 执行作业是否已被取消
    async fn is_cancelled(&mut self) -> bool;
}

/// 重试引擎的终局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryResult {
    Succeeded,
    Failed { message: String },
    Cancelled,
}

/// 重试引擎输出
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub history: Vec<RetryHistoryEntry>,
    /// 最终成功尝试的引擎；终态失败时为最后一次尝试的引擎
    pub engine_used: Option<EngineKind>,
    pub proxy_used: Option<bool>,
    pub result: RetryResult,
}

/// 按策略逐项尝试
///
/// 每项先睡delay_seconds再执行；成功即返回；尝试间检测取消。
/// 终态失败的消息汇总所有尝试
pub async fn drive<R: AttemptRunner>(strategy: &[RetryStep], runner: &mut R) -> RetryOutcome {
    let mut history: Vec<RetryHistoryEntry> = Vec::new();
    let mut engine_used = None;
    let mut proxy_used = None;

    for (index, step) in strategy.iter().enumerate() {
        if runner.is_cancelled().await {
            let now = Utc::now();
            history.push(RetryHistoryEntry {
                attempt: step.attempt,
                engine: step.engine,
                use_proxy: step.use_proxy,
                started_at: now,
                completed_at: now,
                status: AttemptStatus::Cancelled,
                error_type: None,
                error_message: None,
                duration_seconds: 0.0,
            });
            return RetryOutcome {
                history,
                engine_used,
                proxy_used,
                result: RetryResult::Cancelled,
            };
        }

        if step.delay_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(step.delay_seconds)).await;
        }

        let started_at = Utc::now();
        let result = runner.attempt(step).await;
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        engine_used = Some(step.engine);
        proxy_used = Some(step.use_proxy);

        match result {
            Ok(()) => {
                info!(
                    "attempt {} succeeded with engine {} (proxy: {})",
                    step.attempt, step.engine, step.use_proxy
                );
                history.push(RetryHistoryEntry {
                    attempt: step.attempt,
                    engine: step.engine,
                    use_proxy: step.use_proxy,
                    started_at,
                    completed_at,
                    status: AttemptStatus::Success,
                    error_type: None,
                    error_message: None,
                    duration_seconds,
                });
                return RetryOutcome {
                    history,
                    engine_used,
                    proxy_used,
                    result: RetryResult::Succeeded,
                };
            }
            Err(e) => {
                warn!(
                    "attempt {} failed with engine {} (proxy: {}): {}",
                    step.attempt, step.engine, step.use_proxy, e
                );
                history.push(RetryHistoryEntry {
                    attempt: step.attempt,
                    engine: step.engine,
                    use_proxy: step.use_proxy,
                    started_at,
                    completed_at,
                    status: AttemptStatus::Failed,
                    error_type: Some(e.classify()),
                    error_message: Some(e.to_string()),
                    duration_seconds,
                });

                if index + 1 == strategy.len() {
                    let summary = summarize(&history);
                    return RetryOutcome {
                        history,
                        engine_used,
                        proxy_used,
                        result: RetryResult::Failed { message: summary },
                    };
                }
            }
        }
    }

    // 空策略：上游保证非空，防御性返回失败
    RetryOutcome {
        history,
        engine_used,
        proxy_used,
        result: RetryResult::Failed {
            message: "retry strategy is empty".to_string(),
        },
    }
}

fn summarize(history: &[RetryHistoryEntry]) -> String {
    let attempts: Vec<String> = history
        .iter()
        .map(|entry| {
            format!(
                "attempt {} ({}, proxy={}): {}",
                entry.attempt,
                entry.engine,
                entry.use_proxy,
                entry
                    .error_message
                    .as_deref()
                    .unwrap_or("no error recorded")
            )
        })
        .collect();
    format!("all {} attempts failed; {}", history.len(), attempts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::retry_history::AttemptErrorKind;

    /// 脚本化的尝试执行方
    struct ScriptedRunner {
        script: Vec<Result<(), EngineError>>,
        cancelled_after: Option<usize>,
        attempts_made: usize,
    }

    impl ScriptedRunner {
        fn new(script: Vec<Result<(), EngineError>>) -> Self {
            Self {
                script,
                cancelled_after: None,
                attempts_made: 0,
            }
        }
    }

    #[async_trait]
    impl AttemptRunner for ScriptedRunner {
        async fn attempt(&mut self, _step: &RetryStep) -> Result<(), EngineError> {
            let result = self.script.remove(0);
            self.attempts_made += 1;
            result
        }

        async fn is_cancelled(&mut self) -> bool {
            self.cancelled_after
                .is_some_and(|after| self.attempts_made >= after)
        }
    }

    fn step(attempt: u32, engine: EngineKind, use_proxy: bool) -> RetryStep {
        RetryStep {
            attempt,
            engine,
            use_proxy,
            delay_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let strategy = vec![step(0, EngineKind::HtmlParser, false)];
        let mut runner = ScriptedRunner::new(vec![Ok(())]);

        let outcome = drive(&strategy, &mut runner).await;

        assert_eq!(outcome.result, RetryResult::Succeeded);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.history[0].status, AttemptStatus::Success);
        assert_eq!(outcome.engine_used, Some(EngineKind::HtmlParser));
        assert_eq!(outcome.proxy_used, Some(false));
    }

    #[tokio::test]
    async fn test_engine_fallback_succeeds_on_third() {
        // html/no-proxy失败(403)，html/proxy失败(timeout)，headless成功
        let strategy = vec![
            step(0, EngineKind::HtmlParser, false),
            step(1, EngineKind::HtmlParser, true),
            step(2, EngineKind::HeadlessBrowser, false),
        ];
        let mut runner = ScriptedRunner::new(vec![
            Err(EngineError::HttpStatus(403)),
            Err(EngineError::Timeout),
            Ok(()),
        ]);

        let outcome = drive(&strategy, &mut runner).await;

        assert_eq!(outcome.result, RetryResult::Succeeded);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.history[0].status, AttemptStatus::Failed);
        assert_eq!(
            outcome.history[0].error_type,
            Some(AttemptErrorKind::Http4xx)
        );
        assert_eq!(
            outcome.history[1].error_type,
            Some(AttemptErrorKind::Timeout)
        );
        assert_eq!(outcome.history[2].status, AttemptStatus::Success);
        assert_eq!(outcome.engine_used, Some(EngineKind::HeadlessBrowser));
        assert_eq!(outcome.proxy_used, Some(false));
    }

    #[tokio::test]
    async fn test_single_entry_terminal_failure() {
        let strategy = vec![step(0, EngineKind::HtmlParser, false)];
        let mut runner = ScriptedRunner::new(vec![Err(EngineError::HttpStatus(404))]);

        let outcome = drive(&strategy, &mut runner).await;

        match &outcome.result {
            RetryResult::Failed { message } => {
                assert!(message.contains("attempt 0"));
                assert!(message.contains("404"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.engine_used, Some(EngineKind::HtmlParser));
        assert_eq!(outcome.proxy_used, Some(false));
    }

    #[tokio::test]
    async fn test_all_attempts_fail_records_every_entry() {
        let strategy = vec![
            step(0, EngineKind::HtmlParser, false),
            step(1, EngineKind::HeadlessBrowser, false),
        ];
        let mut runner = ScriptedRunner::new(vec![
            Err(EngineError::HttpStatus(500)),
            Err(EngineError::Javascript("page crash".into())),
        ]);

        let outcome = drive(&strategy, &mut runner).await;

        assert!(matches!(outcome.result, RetryResult::Failed { .. }));
        assert_eq!(outcome.history.len(), 2);
        assert!(outcome
            .history
            .iter()
            .all(|e| e.status == AttemptStatus::Failed));
        // 终态失败时记录最后一次尝试的配置
        assert_eq!(outcome.engine_used, Some(EngineKind::HeadlessBrowser));
    }

    #[tokio::test]
    async fn test_cancellation_between_attempts() {
        let strategy = vec![
            step(0, EngineKind::HtmlParser, false),
            step(1, EngineKind::HeadlessBrowser, false),
        ];
        let mut runner = ScriptedRunner::new(vec![Err(EngineError::HttpStatus(500)), Ok(())]);
        runner.cancelled_after = Some(1);

        let outcome = drive(&strategy, &mut runner).await;

        assert_eq!(outcome.result, RetryResult::Cancelled);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[1].status, AttemptStatus::Cancelled);
    }
}
