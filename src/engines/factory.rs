// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::CrawlerSettings;
use crate::domain::models::crawler_config::{EngineKind, ProxyConfig};
use crate::engines::browser_engine::HeadlessBrowserEngine;
use crate::engines::html_engine::{EngineOptions, HtmlParserEngine};
use crate::engines::traits::{CrawlEngine, EngineError};

/// 引擎工厂特质
///
/// 重试引擎按每次尝试的 (engine, use_proxy) 请求新引擎
pub trait EngineFactory: Send + Sync {
    fn build(
        &self,
        kind: EngineKind,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Arc<dyn CrawlEngine>, EngineError>;
}

/// 按配置构建真实引擎的工厂
pub struct DefaultEngineFactory {
    options: EngineOptions,
}

impl DefaultEngineFactory {
    pub fn new(settings: &CrawlerSettings) -> Self {
        Self {
            options: engine_options(settings),
        }
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn build(
        &self,
        kind: EngineKind,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Arc<dyn CrawlEngine>, EngineError> {
        match kind {
            EngineKind::HtmlParser => Ok(Arc::new(HtmlParserEngine::new(
                proxy,
                self.options.clone(),
            )?)),
            EngineKind::HeadlessBrowser => Ok(Arc::new(HeadlessBrowserEngine::new(
                proxy,
                self.options.clone(),
            )?)),
        }
    }
}

/// 配置到引擎参数的映射
pub fn engine_options(settings: &CrawlerSettings) -> EngineOptions {
    // rate_limit_per_second上界与固定礼貌间隔取较大者
    let rate_delay_ms = if settings.rate_limit_per_second > 0 {
        1000 / settings.rate_limit_per_second as u64
    } else {
        0
    };
    let per_host_delay = Duration::from_millis(rate_delay_ms.max(settings.per_host_delay_ms));

    EngineOptions {
        user_agent: settings.user_agent.clone(),
        timeout: Duration::from_secs(settings.download_timeout_seconds),
        per_host_delay,
        max_url_retries: settings.max_retries,
        retry_base_seconds: settings.retry_delay_base_seconds,
        headless_timeout: Duration::from_secs(settings.headless_timeout_seconds),
    }
}
