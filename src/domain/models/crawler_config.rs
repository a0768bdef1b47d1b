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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::models::job::DomainError;

/// 爬取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrawlerMode {
    /// 仅主页面HTML
    #[default]
    PageOnly,
    /// 页面 + 全部资源
    PageWithAll,
    /// 页面 + 选定类型资源
    PageWithFiltered,
    /// 整站爬取（按max_depth跟踪链接）
    FullWebsite,
}

impl fmt::Display for CrawlerMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CrawlerMode::PageOnly => write!(f, "page_only"),
            CrawlerMode::PageWithAll => write!(f, "page_with_all"),
            CrawlerMode::PageWithFiltered => write!(f, "page_with_filtered"),
            CrawlerMode::FullWebsite => write!(f, "full_website"),
        }
    }
}

/// 爬取引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// 轻量HTTP+HTML解析，不执行JavaScript
    #[default]
    HtmlParser,
    /// 无头浏览器，执行JavaScript，慢但更健壮
    HeadlessBrowser,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineKind::HtmlParser => write!(f, "html_parser"),
            EngineKind::HeadlessBrowser => write!(f, "headless_browser"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html_parser" => Ok(EngineKind::HtmlParser),
            "headless_browser" => Ok(EngineKind::HeadlessBrowser),
            _ => Err(()),
        }
    }
}

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Css,
    Js,
    Images,
    Fonts,
    Videos,
    Documents,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AssetType::Css => write!(f, "css"),
            AssetType::Js => write!(f, "js"),
            AssetType::Images => write!(f, "images"),
            AssetType::Fonts => write!(f, "fonts"),
            AssetType::Videos => write!(f, "videos"),
            AssetType::Documents => write!(f, "documents"),
        }
    }
}

impl AssetType {
    /// 该资源类型对应的文件扩展名（含点）
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            AssetType::Css => &[".css"],
            AssetType::Js => &[".js", ".mjs"],
            AssetType::Images => &[
                ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".bmp",
            ],
            AssetType::Fonts => &[".woff", ".woff2", ".ttf", ".otf", ".eot"],
            AssetType::Videos => &[".mp4", ".webm", ".ogg", ".avi", ".mov"],
            AssetType::Documents => &[
                ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".txt", ".rtf", ".odt",
            ],
        }
    }

    /// 根据URL路径的扩展名归类资源
    pub fn classify(path: &str) -> Option<AssetType> {
        let lower = path.to_lowercase();
        for asset_type in [
            AssetType::Css,
            AssetType::Js,
            AssetType::Images,
            AssetType::Fonts,
            AssetType::Videos,
            AssetType::Documents,
        ] {
            if asset_type.extensions().iter().any(|ext| lower.ends_with(ext)) {
                return Some(asset_type);
            }
        }
        None
    }
}

/// PDF处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PdfHandling {
    /// 只保留单个PDF
    #[default]
    Individual,
    /// 只保留合并后的PDF
    Combined,
    /// 两者都保留
    Both,
}

impl PdfHandling {
    /// 是否需要生成合并PDF
    pub fn wants_combined(&self) -> bool {
        matches!(self, PdfHandling::Combined | PdfHandling::Both)
    }
}

/// 代理配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// http | https | socks5
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// 生成代理URL（含凭据）
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", self.protocol, user, pass, self.host, self.port)
            }
            _ => format!("{}://{}:{}", self.protocol, self.host, self.port),
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if !matches!(self.protocol.as_str(), "http" | "https" | "socks5") {
            return Err(DomainError::Validation(format!(
                "unsupported proxy protocol: {}",
                self.protocol
            )));
        }
        if self.host.is_empty() {
            return Err(DomainError::Validation("proxy host is empty".to_string()));
        }
        Ok(())
    }
}

/// 重试策略中的一步
///
/// attempt 从0开始严格递增；delay_seconds 为该次尝试前的等待
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStep {
    pub attempt: u32,
    pub engine: EngineKind,
    pub use_proxy: bool,
    pub delay_seconds: u64,
}

/// 爬虫配置值对象
///
/// 作为JSON blob存储在作业行内，在边界处反序列化并校验
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub mode: CrawlerMode,
    pub engine: EngineKind,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub asset_types: Vec<AssetType>,
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub pdf_handling: PdfHandling,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub follow_external_links: bool,
    #[serde(default = "default_retry_enabled")]
    pub retry_enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_strategy: Vec<RetryStep>,
}

fn default_max_depth() -> u32 {
    3
}

fn default_retry_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            mode: CrawlerMode::PageOnly,
            engine: EngineKind::HtmlParser,
            use_proxy: false,
            proxy: None,
            asset_types: Vec::new(),
            file_extensions: Vec::new(),
            pdf_handling: PdfHandling::Individual,
            max_depth: default_max_depth(),
            follow_external_links: false,
            retry_enabled: default_retry_enabled(),
            max_retries: default_max_retries(),
            retry_strategy: Vec::new(),
        }
    }
}

impl CrawlerConfig {
    /// 校验配置一致性
    ///
    /// - page_with_filtered 必须给出资源类型，page_only 不允许给出
    /// - use_proxy 与 proxy 必须成对出现（重试策略中的代理步同理）
    /// - retry_strategy 的 attempt 从0严格递增
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.mode == CrawlerMode::PageWithFiltered && self.asset_types.is_empty() {
            return Err(DomainError::Validation(
                "mode 'page_with_filtered' requires at least one asset type".to_string(),
            ));
        }
        if self.mode == CrawlerMode::PageOnly && !self.asset_types.is_empty() {
            return Err(DomainError::Validation(
                "mode 'page_only' should not have asset_types".to_string(),
            ));
        }

        if self.max_depth < 1 {
            return Err(DomainError::Validation(format!(
                "max_depth must be >= 1, got {}",
                self.max_depth
            )));
        }

        let strategy_wants_proxy = self.retry_strategy.iter().any(|s| s.use_proxy);
        if (self.use_proxy || strategy_wants_proxy) && self.proxy.is_none() {
            return Err(DomainError::Validation(
                "proxy configuration required when use_proxy is set".to_string(),
            ));
        }
        if let Some(proxy) = &self.proxy {
            proxy.validate()?;
        }

        for (index, step) in self.retry_strategy.iter().enumerate() {
            if step.attempt != index as u32 {
                return Err(DomainError::Validation(format!(
                    "retry strategy attempts must be strictly increasing from 0, \
                     got {} at position {}",
                    step.attempt, index
                )));
            }
        }

        Ok(())
    }

    /// 实际生效的重试策略
    ///
    /// 空策略退化为单次尝试（配置的引擎/代理）；
    /// retry_enabled=false 只保留第一步
    pub fn effective_strategy(&self) -> Vec<RetryStep> {
        let mut steps = if self.retry_strategy.is_empty() {
            vec![RetryStep {
                attempt: 0,
                engine: self.engine,
                use_proxy: self.use_proxy,
                delay_seconds: 0,
            }]
        } else {
            self.retry_strategy.clone()
        };

        if !self.retry_enabled {
            steps.truncate(1);
        }

        let cap = (self.max_retries as usize + 1).max(1);
        steps.truncate(cap);
        steps
    }

    /// 该配置是否下载页面资源
    pub fn downloads_assets(&self) -> bool {
        matches!(
            self.mode,
            CrawlerMode::PageWithAll | CrawlerMode::PageWithFiltered
        )
    }

    /// 预置策略：conservative
    ///
    /// 先HTML解析器（无代理、有代理），再无头浏览器，间隔保守
    pub fn conservative_strategy() -> Vec<RetryStep> {
        vec![
            RetryStep { attempt: 0, engine: EngineKind::HtmlParser, use_proxy: false, delay_seconds: 0 },
            RetryStep { attempt: 1, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 30 },
            RetryStep { attempt: 2, engine: EngineKind::HeadlessBrowser, use_proxy: false, delay_seconds: 60 },
            RetryStep { attempt: 3, engine: EngineKind::HeadlessBrowser, use_proxy: true, delay_seconds: 120 },
        ]
    }

    /// 预置策略：aggressive
    ///
    /// 直接上无头浏览器，短间隔
    pub fn aggressive_strategy() -> Vec<RetryStep> {
        vec![
            RetryStep { attempt: 0, engine: EngineKind::HeadlessBrowser, use_proxy: false, delay_seconds: 0 },
            RetryStep { attempt: 1, engine: EngineKind::HeadlessBrowser, use_proxy: true, delay_seconds: 5 },
            RetryStep { attempt: 2, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 10 },
        ]
    }

    /// 预置策略：proxy_first
    pub fn proxy_first_strategy() -> Vec<RetryStep> {
        vec![
            RetryStep { attempt: 0, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 0 },
            RetryStep { attempt: 1, engine: EngineKind::HeadlessBrowser, use_proxy: true, delay_seconds: 15 },
            RetryStep { attempt: 2, engine: EngineKind::HtmlParser, use_proxy: false, delay_seconds: 30 },
        ]
    }

    /// 预置策略：balanced
    pub fn balanced_strategy() -> Vec<RetryStep> {
        vec![
            RetryStep { attempt: 0, engine: EngineKind::HtmlParser, use_proxy: false, delay_seconds: 0 },
            RetryStep { attempt: 1, engine: EngineKind::HeadlessBrowser, use_proxy: false, delay_seconds: 15 },
            RetryStep { attempt: 2, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 30 },
            RetryStep { attempt: 3, engine: EngineKind::HeadlessBrowser, use_proxy: true, delay_seconds: 60 },
        ]
    }

    /// 按名称取预置策略
    pub fn named_strategy(name: &str) -> Option<Vec<RetryStep>> {
        match name {
            "conservative" => Some(Self::conservative_strategy()),
            "aggressive" => Some(Self::aggressive_strategy()),
            "proxy_first" => Some(Self::proxy_first_strategy()),
            "balanced" => Some(Self::balanced_strategy()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> ProxyConfig {
        ProxyConfig {
            host: "proxy.internal".to_string(),
            port: 8080,
            protocol: "http".to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(CrawlerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_filtered_mode_requires_asset_types() {
        let config = CrawlerConfig {
            mode: CrawlerMode::PageWithFiltered,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_page_only_forbids_asset_types() {
        let config = CrawlerConfig {
            asset_types: vec![AssetType::Css],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proxy_step_requires_proxy_config() {
        let config = CrawlerConfig {
            retry_strategy: vec![
                RetryStep { attempt: 0, engine: EngineKind::HtmlParser, use_proxy: false, delay_seconds: 0 },
                RetryStep { attempt: 1, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 5 },
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let with_proxy = CrawlerConfig {
            proxy: Some(proxy()),
            ..config
        };
        assert!(with_proxy.validate().is_ok());
    }

    #[test]
    fn test_strategy_attempts_must_start_at_zero() {
        let config = CrawlerConfig {
            retry_strategy: vec![RetryStep {
                attempt: 1,
                engine: EngineKind::HtmlParser,
                use_proxy: false,
                delay_seconds: 0,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_strategy_defaults_to_single_attempt() {
        let config = CrawlerConfig::default();
        let steps = config.effective_strategy();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].engine, EngineKind::HtmlParser);
        assert!(!steps[0].use_proxy);
    }

    #[test]
    fn test_retry_disabled_keeps_first_step_only() {
        let config = CrawlerConfig {
            retry_enabled: false,
            retry_strategy: CrawlerConfig::balanced_strategy(),
            proxy: Some(proxy()),
            ..Default::default()
        };
        assert_eq!(config.effective_strategy().len(), 1);
    }

    #[test]
    fn test_named_strategies_are_well_formed() {
        for name in ["conservative", "aggressive", "proxy_first", "balanced"] {
            let steps = CrawlerConfig::named_strategy(name).unwrap();
            for (index, step) in steps.iter().enumerate() {
                assert_eq!(step.attempt, index as u32);
            }
        }
        assert!(CrawlerConfig::named_strategy("nope").is_none());
    }

    #[test]
    fn test_asset_classification() {
        assert_eq!(AssetType::classify("/static/app.css"), Some(AssetType::Css));
        assert_eq!(AssetType::classify("/img/logo.SVG"), Some(AssetType::Images));
        assert_eq!(AssetType::classify("/docs/report.pdf"), Some(AssetType::Documents));
        assert_eq!(AssetType::classify("/page.html"), None);
    }

    #[test]
    fn test_proxy_url_with_credentials() {
        let proxy = ProxyConfig {
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            ..proxy()
        };
        assert_eq!(proxy.url(), "http://u:p@proxy.internal:8080");
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = CrawlerConfig {
            mode: CrawlerMode::PageWithFiltered,
            asset_types: vec![AssetType::Documents],
            file_extensions: vec!["pdf".to_string()],
            pdf_handling: PdfHandling::Both,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mode"], "page_with_filtered");
        assert_eq!(json["pdf_handling"], "both");

        let parsed: CrawlerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.mode, CrawlerMode::PageWithFiltered);
        assert!(parsed.validate().is_ok());
    }
}
