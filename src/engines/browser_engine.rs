// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::models::crawler_config::{AssetType, EngineKind, ProxyConfig};
use crate::domain::services::url_normalizer;
use crate::engines::html_engine::{parse_links, EngineOptions, HtmlParserEngine};
use crate::engines::traits::{
    AssetDownload, CrawlEngine, CrawlOutput, DownloadOutput, EngineError,
};

/// 无头浏览器引擎
///
/// 基于chromiumoxide渲染JavaScript页面；文件与资源下载
/// 走内部的HTTP客户端（渲染只影响发现，不影响传输）
pub struct HeadlessBrowserEngine {
    options: EngineOptions,
    proxy: Option<ProxyConfig>,
    browser: Mutex<Option<Browser>>,
    http: HtmlParserEngine,
}

impl HeadlessBrowserEngine {
    pub fn new(proxy: Option<&ProxyConfig>, options: EngineOptions) -> Result<Self, EngineError> {
        let http = HtmlParserEngine::new(proxy, options.clone())?;
        Ok(Self {
            options,
            proxy: proxy.cloned(),
            browser: Mutex::new(None),
            http,
        })
    }

    /// 渲染页面并返回最终HTML
    ///
    /// 浏览器惰性启动并在引擎生命周期内复用；
    /// 同一引擎实例的页面加载串行（兼作每host礼貌限速）
    async fn render(&self, url: &str) -> Result<String, EngineError> {
        url_normalizer::validate(url).map_err(|e| EngineError::UrlRejected(e.to_string()))?;

        let mut guard = self.browser.lock().await;

        if guard.is_none() {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(self.options.headless_timeout)
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage");

            if let Some(proxy) = &self.proxy {
                // chromium的代理参数不携带凭据
                builder = builder.arg(format!(
                    "--proxy-server={}://{}:{}",
                    proxy.protocol, proxy.host, proxy.port
                ));
            }

            let config = builder
                .build()
                .map_err(|e| EngineError::Other(format!("browser config: {}", e)))?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| EngineError::Other(format!("browser launch: {}", e)))?;

            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            debug!("headless browser launched");
            *guard = Some(browser);
        }

        let browser = guard.as_ref().expect("browser initialized above");

        let result = tokio::time::timeout(self.options.headless_timeout, async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| EngineError::Javascript(e.to_string()))?;

            page.goto(url)
                .await
                .map_err(|e| EngineError::Javascript(e.to_string()))?;

            let html = page
                .content()
                .await
                .map_err(|e| EngineError::Javascript(e.to_string()))?;

            Ok::<String, EngineError>(html)
        })
        .await
        .map_err(|_| EngineError::Timeout)?;

        result
    }
}

#[async_trait]
impl CrawlEngine for HeadlessBrowserEngine {
    async fn crawl_page(
        &self,
        url: &str,
        file_extensions: &[String],
    ) -> Result<CrawlOutput, EngineError> {
        let html = self.render(url).await?;
        let links = parse_links(&html, url, file_extensions);

        Ok(CrawlOutput {
            url: url.to_string(),
            links,
            html,
            // CDP不直接暴露响应状态；渲染成功视为200
            status_code: 200,
        })
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadOutput, EngineError> {
        self.http.download(url, destination).await
    }

    async fn extract_assets(
        &self,
        html: &str,
        base_url: &str,
        asset_types: &[AssetType],
    ) -> Result<HashMap<AssetType, Vec<String>>, EngineError> {
        self.http.extract_assets(html, base_url, asset_types).await
    }

    async fn download_assets(
        &self,
        assets: &HashMap<AssetType, Vec<String>>,
        destination: &Path,
        max_concurrent: usize,
    ) -> Result<HashMap<AssetType, Vec<AssetDownload>>, EngineError> {
        self.http
            .download_assets(assets, destination, max_concurrent)
            .await
    }

    async fn close(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            let _ = browser.close().await;
            debug!("headless browser closed");
        }
    }

    fn kind(&self) -> EngineKind {
        EngineKind::HeadlessBrowser
    }
}
