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
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::models::crawler_config::{AssetType, EngineKind};
use crate::domain::models::retry_history::AttemptErrorKind;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 非2xx状态码
    #[error("HTTP {0}")]
    HttpStatus(u16),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 代理故障
    #[error("Proxy error: {0}")]
    Proxy(String),
    /// 页面JS执行失败（仅无头浏览器）
    #[error("JavaScript error: {0}")]
    Javascript(String),
    /// URL被拒绝（SSRF等）
    #[error("URL rejected: {0}")]
    UrlRejected(String),
    /// 其他错误
    #[error("Engine error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// 5xx、408、429、超时、连接类错误可重试；其余4xx与校验错误不可
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            EngineError::HttpStatus(code) => {
                crate::utils::retry_policy::is_retryable_status(*code)
            }
            EngineError::Timeout => true,
            EngineError::Proxy(_) => true,
            _ => false,
        }
    }

    /// 映射到重试历史的错误分类
    pub fn classify(&self) -> AttemptErrorKind {
        match self {
            EngineError::Timeout => AttemptErrorKind::Timeout,
            EngineError::HttpStatus(code) if (400..500).contains(code) => {
                AttemptErrorKind::Http4xx
            }
            EngineError::HttpStatus(_) => AttemptErrorKind::Http5xx,
            EngineError::RequestFailed(e) => {
                if e.is_timeout() {
                    AttemptErrorKind::Timeout
                } else if let Some(status) = e.status() {
                    if status.is_client_error() {
                        AttemptErrorKind::Http4xx
                    } else {
                        AttemptErrorKind::Http5xx
                    }
                } else {
                    AttemptErrorKind::Other
                }
            }
            EngineError::Proxy(_) => AttemptErrorKind::ProxyError,
            EngineError::Javascript(_) => AttemptErrorKind::JavascriptError,
            _ => AttemptErrorKind::Other,
        }
    }
}

/// 页面爬取结果
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    pub url: String,
    /// 解析出的出链（绝对URL，去重保序）
    pub links: Vec<String>,
    pub html: String,
    pub status_code: u16,
}

/// 单个下载结果
#[derive(Debug, Clone)]
pub struct DownloadOutput {
    pub url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

/// 资源下载结果（失败不打断批量下载）
#[derive(Debug, Clone)]
pub struct AssetDownload {
    pub url: String,
    pub path: Option<PathBuf>,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub error: Option<String>,
}

/// 爬取引擎特质
///
/// 两个实现：HtmlParserEngine（HTTP+HTML解析）与
/// HeadlessBrowserEngine（JS渲染）；代理在构建时注入
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    /// 抓取页面并抽取出链；file_extensions非空时只保留匹配扩展名的链接
    async fn crawl_page(
        &self,
        url: &str,
        file_extensions: &[String],
    ) -> Result<CrawlOutput, EngineError>;

    /// 下载单个文件到目标路径（流式）
    async fn download(&self, url: &str, destination: &Path)
        -> Result<DownloadOutput, EngineError>;

    /// 从已渲染HTML中抽取资源引用
    async fn extract_assets(
        &self,
        html: &str,
        base_url: &str,
        asset_types: &[AssetType],
    ) -> Result<HashMap<AssetType, Vec<String>>, EngineError>;

    /// 并发下载资源到目标目录，按类型分子目录
    async fn download_assets(
        &self,
        assets: &HashMap<AssetType, Vec<String>>,
        destination: &Path,
        max_concurrent: usize,
    ) -> Result<HashMap<AssetType, Vec<AssetDownload>>, EngineError>;

    /// 释放连接池/浏览器
    async fn close(&self);

    /// 引擎种类
    fn kind(&self) -> EngineKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_retryability() {
        assert!(EngineError::HttpStatus(503).is_retryable());
        assert!(EngineError::HttpStatus(429).is_retryable());
        assert!(EngineError::HttpStatus(408).is_retryable());
        assert!(!EngineError::HttpStatus(404).is_retryable());
        assert!(!EngineError::HttpStatus(403).is_retryable());
    }

    #[test]
    fn test_classification() {
        assert_eq!(EngineError::Timeout.classify(), AttemptErrorKind::Timeout);
        assert_eq!(
            EngineError::HttpStatus(403).classify(),
            AttemptErrorKind::Http4xx
        );
        assert_eq!(
            EngineError::HttpStatus(502).classify(),
            AttemptErrorKind::Http5xx
        );
        assert_eq!(
            EngineError::Proxy("refused".into()).classify(),
            AttemptErrorKind::ProxyError
        );
        assert_eq!(
            EngineError::Javascript("eval".into()).classify(),
            AttemptErrorKind::JavascriptError
        );
    }
}
