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
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::models::crawler_config::{AssetType, EngineKind, ProxyConfig};
use crate::domain::services::url_normalizer;
use crate::engines::traits::{
    AssetDownload, CrawlEngine, CrawlOutput, DownloadOutput, EngineError,
};
use crate::utils::retry_policy::{is_retryable_status, RetryPolicy};

/// 引擎构建参数
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub user_agent: String,
    pub timeout: Duration,
    /// 同一host两次请求的最小间隔
    pub per_host_delay: Duration,
    pub max_url_retries: u32,
    pub retry_base_seconds: u64,
    pub headless_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; ingestrs-bot/1.0)".to_string(),
            timeout: Duration::from_secs(60),
            per_host_delay: Duration::from_millis(500),
            max_url_retries: 3,
            retry_base_seconds: 1,
            headless_timeout: Duration::from_secs(30),
        }
    }
}

static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("css url regex"));

/// HTML解析引擎
///
/// HTTP抓取 + HTML解析，不执行JavaScript；
/// 每host限速与每URL重试都在引擎内部处理
pub struct HtmlParserEngine {
    client: reqwest::Client,
    options: EngineOptions,
    retry_policy: RetryPolicy,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl HtmlParserEngine {
    pub fn new(proxy: Option<&ProxyConfig>, options: EngineOptions) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .cookie_store(true)
            .gzip(true);

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy.url())
                .map_err(|e| EngineError::Proxy(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let retry_policy =
            RetryPolicy::for_downloads(options.retry_base_seconds, options.max_url_retries);

        Ok(Self {
            client: builder.build()?,
            options,
            retry_policy,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// 每host礼貌间隔
    async fn apply_rate_limit(&self, url: &str) {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()));
        let Some(host) = host else { return };

        let wait = {
            let mut map = self.last_request.lock().unwrap();
            let now = Instant::now();
            let wait = map.get(&host).and_then(|last| {
                let elapsed = now.duration_since(*last);
                (elapsed < self.options.per_host_delay)
                    .then(|| self.options.per_host_delay - elapsed)
            });
            map.insert(host, now);
            wait
        };

        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }

    /// GET并在瞬时错误上重试（指数退避）
    ///
    /// 4xx（除408/429）不重试
    async fn fetch_with_retry(&self, url: &str) -> Result<reqwest::Response, EngineError> {
        url_normalizer::validate(url).map_err(|e| EngineError::UrlRejected(e.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.apply_rate_limit(url).await;

            let result = self.client.get(url).send().await;
            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    if !is_retryable_status(status) || attempt >= self.retry_policy.max_retries {
                        return Err(EngineError::HttpStatus(status));
                    }
                    debug!("HTTP {} from {} (attempt {}), retrying", status, url, attempt);
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || attempt >= self.retry_policy.max_retries {
                        if e.is_timeout() {
                            return Err(EngineError::Timeout);
                        }
                        return Err(EngineError::RequestFailed(e));
                    }
                    debug!("request error for {} (attempt {}): {}", url, attempt, e);
                }
            }

            tokio::time::sleep(self.retry_policy.calculate_backoff(attempt)).await;
        }
    }
}

#[async_trait]
impl CrawlEngine for HtmlParserEngine {
    async fn crawl_page(
        &self,
        url: &str,
        file_extensions: &[String],
    ) -> Result<CrawlOutput, EngineError> {
        let response = self.fetch_with_retry(url).await?;
        let status_code = response.status().as_u16();
        let html = response.text().await?;

        let links = parse_links(&html, url, file_extensions);

        Ok(CrawlOutput {
            url: url.to_string(),
            links,
            html,
            status_code,
        })
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadOutput, EngineError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Other(format!("create dir: {}", e)))?;
        }

        let mut response = self.fetch_with_retry(url).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| EngineError::Other(format!("create file: {}", e)))?;

        let mut size_bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::Other(format!("write file: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| EngineError::Other(format!("flush file: {}", e)))?;

        Ok(DownloadOutput {
            url: url.to_string(),
            path: destination.to_path_buf(),
            size_bytes,
            content_type,
        })
    }

    async fn extract_assets(
        &self,
        html: &str,
        base_url: &str,
        asset_types: &[AssetType],
    ) -> Result<HashMap<AssetType, Vec<String>>, EngineError> {
        Ok(parse_assets(html, base_url, asset_types))
    }

    async fn download_assets(
        &self,
        assets: &HashMap<AssetType, Vec<String>>,
        destination: &Path,
        max_concurrent: usize,
    ) -> Result<HashMap<AssetType, Vec<AssetDownload>>, EngineError> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut results: HashMap<AssetType, Vec<AssetDownload>> = HashMap::new();

        for (asset_type, urls) in assets {
            let type_dir = destination.join(asset_type.to_string());
            let mut handles = Vec::new();

            for url in urls {
                let semaphore = semaphore.clone();
                let url = url.clone();
                let dest = type_dir.join(filename_from_url(&url));

                let fut = async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = self.download(&url, &dest).await;
                    (url, dest, result)
                };
                handles.push(fut);
            }

            let downloads = futures::future::join_all(handles).await;
            let entries = results.entry(*asset_type).or_default();
            for (url, dest, result) in downloads {
                match result {
                    Ok(output) => entries.push(AssetDownload {
                        url,
                        path: Some(output.path),
                        size_bytes: output.size_bytes,
                        content_type: output.content_type,
                        error: None,
                    }),
                    Err(e) => {
                        warn!("asset download failed for {}: {}", url, e);
                        entries.push(AssetDownload {
                            url,
                            path: Some(dest),
                            size_bytes: 0,
                            content_type: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        Ok(results)
    }

    async fn close(&self) {
        // reqwest连接池随drop释放
    }

    fn kind(&self) -> EngineKind {
        EngineKind::HtmlParser
    }
}

/// 从HTML抽取出链
///
/// 解析<a href>，相对路径转绝对；file_extensions非空时只保留
/// 匹配扩展名的链接；拒绝表命中的URL直接丢弃；去重保序
pub fn parse_links(html: &str, base_url: &str, file_extensions: &[String]) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    {
        let document = Html::parse_document(html);
        let selector = Selector::parse("a[href]").unwrap();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(absolute) = base.join(href) else {
                continue;
            };
            let url_str = absolute.to_string();

            if url_normalizer::validate(&url_str).is_err() {
                continue;
            }

            if !file_extensions.is_empty() {
                let path = absolute.path().to_lowercase();
                let matched = file_extensions
                    .iter()
                    .any(|ext| path.ends_with(&format!(".{}", ext.trim_start_matches('.'))));
                if !matched {
                    continue;
                }
            }

            if seen.insert(url_str.clone()) {
                links.push(url_str);
            }
        }
    }

    links
}

/// 从HTML抽取资源引用
///
/// <link rel=stylesheet>、<script src>、<img src/srcset>、
/// <video>/<source>、<style>块内的 url(...)（含@font-face）
pub fn parse_assets(
    html: &str,
    base_url: &str,
    asset_types: &[AssetType],
) -> HashMap<AssetType, Vec<String>> {
    let Ok(base) = Url::parse(base_url) else {
        return HashMap::new();
    };

    let mut assets: HashMap<AssetType, Vec<String>> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut push = |assets: &mut HashMap<AssetType, Vec<String>>,
                    seen: &mut HashSet<String>,
                    asset_type: AssetType,
                    raw: &str| {
        let Ok(absolute) = base.join(raw) else { return };
        let url_str = absolute.to_string();
        if url_normalizer::validate(&url_str).is_err() {
            return;
        }
        if seen.insert(url_str.clone()) {
            assets.entry(asset_type).or_default().push(url_str);
        }
    };

    {
        let document = Html::parse_document(html);

        if asset_types.contains(&AssetType::Css) {
            let selector = Selector::parse("link[rel=\"stylesheet\"][href]").unwrap();
            for element in document.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    push(&mut assets, &mut seen, AssetType::Css, href);
                }
            }
        }

        if asset_types.contains(&AssetType::Js) {
            let selector = Selector::parse("script[src]").unwrap();
            for element in document.select(&selector) {
                if let Some(src) = element.value().attr("src") {
                    push(&mut assets, &mut seen, AssetType::Js, src);
                }
            }
        }

        if asset_types.contains(&AssetType::Images) {
            let selector = Selector::parse("img[src]").unwrap();
            for element in document.select(&selector) {
                if let Some(src) = element.value().attr("src") {
                    push(&mut assets, &mut seen, AssetType::Images, src);
                }
            }
            // srcset: "url1 1x, url2 2x"
            let selector = Selector::parse("img[srcset]").unwrap();
            for element in document.select(&selector) {
                if let Some(srcset) = element.value().attr("srcset") {
                    for item in srcset.split(',') {
                        if let Some(src) = item.trim().split_whitespace().next() {
                            push(&mut assets, &mut seen, AssetType::Images, src);
                        }
                    }
                }
            }
        }

        if asset_types.contains(&AssetType::Videos) {
            for sel in ["video[src]", "source[src]"] {
                let selector = Selector::parse(sel).unwrap();
                for element in document.select(&selector) {
                    if let Some(src) = element.value().attr("src") {
                        push(&mut assets, &mut seen, AssetType::Videos, src);
                    }
                }
            }
        }

        if asset_types.contains(&AssetType::Fonts) || asset_types.contains(&AssetType::Css) {
            // <style>块内的url(...)引用：按扩展名归类（@font-face字体、背景图等）
            let selector = Selector::parse("style").unwrap();
            for element in document.select(&selector) {
                let css = element.text().collect::<String>();
                for capture in CSS_URL_RE.captures_iter(&css) {
                    let raw = capture[1].trim();
                    if raw.starts_with("data:") {
                        continue;
                    }
                    if let Some(asset_type) = AssetType::classify(raw) {
                        if asset_types.contains(&asset_type) {
                            push(&mut assets, &mut seen, asset_type, raw);
                        }
                    }
                }
            }
        }

        if asset_types.contains(&AssetType::Documents) {
            let selector = Selector::parse("a[href]").unwrap();
            for element in document.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    if AssetType::classify(href) == Some(AssetType::Documents) {
                        push(&mut assets, &mut seen, AssetType::Documents, href);
                    }
                }
            }
        }
    }

    assets
}

/// 从URL提取安全文件名
pub fn filename_from_url(url: &str) -> String {
    let name = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("asset-{}", Uuid::new_v4()));

    // 去除路径穿越与非常规字符
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
            <link rel="stylesheet" href="/static/site.css">
            <script src="/static/app.js"></script>
            <style>@font-face { src: url('/fonts/body.woff2'); }</style>
        </head><body>
            <a href="/docs/a.pdf">A</a>
            <a href="https://example.com/docs/b.pdf">B</a>
            <a href="/page.html">Page</a>
            <a href="/docs/a.pdf">A again</a>
            <img src="/img/logo.png">
            <img srcset="/img/x1.png 1x, /img/x2.png 2x">
            <video src="/media/intro.mp4"></video>
        </body></html>
    "#;

    #[test]
    fn test_parse_links_resolves_and_dedupes() {
        let links = parse_links(PAGE, "https://example.com/index.html", &[]);
        assert!(links.contains(&"https://example.com/docs/a.pdf".to_string()));
        assert!(links.contains(&"https://example.com/page.html".to_string()));
        let count = links
            .iter()
            .filter(|l| l.as_str() == "https://example.com/docs/a.pdf")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_parse_links_filters_by_extension() {
        let links = parse_links(PAGE, "https://example.com/", &["pdf".to_string()]);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.ends_with(".pdf")));
    }

    #[test]
    fn test_parse_links_drops_unsafe_hosts() {
        let html = r#"<a href="http://169.254.169.254/meta">meta</a>
                      <a href="http://localhost/x">local</a>
                      <a href="https://example.com/ok">ok</a>"#;
        let links = parse_links(html, "https://example.com/", &[]);
        assert_eq!(links, vec!["https://example.com/ok".to_string()]);
    }

    #[test]
    fn test_parse_assets_by_type() {
        let types = [
            AssetType::Css,
            AssetType::Js,
            AssetType::Images,
            AssetType::Fonts,
            AssetType::Videos,
        ];
        let assets = parse_assets(PAGE, "https://example.com/", &types);

        assert_eq!(assets[&AssetType::Css].len(), 1);
        assert_eq!(assets[&AssetType::Js].len(), 1);
        assert_eq!(assets[&AssetType::Images].len(), 3);
        assert_eq!(
            assets[&AssetType::Fonts],
            vec!["https://example.com/fonts/body.woff2".to_string()]
        );
        assert_eq!(assets[&AssetType::Videos].len(), 1);
    }

    #[test]
    fn test_parse_assets_only_requested_types() {
        let assets = parse_assets(PAGE, "https://example.com/", &[AssetType::Js]);
        assert!(assets.contains_key(&AssetType::Js));
        assert!(!assets.contains_key(&AssetType::Css));
        assert!(!assets.contains_key(&AssetType::Images));
    }

    #[test]
    fn test_parse_assets_documents_from_anchors() {
        let assets = parse_assets(PAGE, "https://example.com/", &[AssetType::Documents]);
        assert_eq!(assets[&AssetType::Documents].len(), 2);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/a/b/report-v2.pdf?x=1"),
            "report-v2.pdf"
        );
        assert!(filename_from_url("https://example.com/").starts_with("asset-"));
        // 路径段保持百分号编码，非常规字符被替换
        assert_eq!(
            filename_from_url("https://example.com/weird/..%2Fname.png"),
            ".._2Fname.png"
        );
    }
}
