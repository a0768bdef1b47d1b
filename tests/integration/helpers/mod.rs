// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use ingestrs::config::settings::{
    ConversionSettings, CrawlerSettings, MonitoringSettings, WorkerSettings,
};
use ingestrs::domain::models::crawler_config::{AssetType, CrawlerConfig, EngineKind};
use ingestrs::domain::models::crawler_schedule::CrawlerSchedule;
use ingestrs::domain::models::job::Job;
use ingestrs::domain::models::work_task::QueueName;
use ingestrs::domain::repositories::crawled_file_repository::CrawledFileRepository;
use ingestrs::domain::repositories::job_repository::JobRepository;
use ingestrs::domain::repositories::page_repository::PageRepository;
use ingestrs::domain::repositories::work_task_repository::WorkTaskRepository;
use ingestrs::domain::services::converter::DocumentConverter;
use ingestrs::engines::factory::EngineFactory;
use ingestrs::engines::traits::{
    AssetDownload, CrawlEngine, CrawlOutput, DownloadOutput, EngineError,
};
use ingestrs::infrastructure::index::bulk_writer::BulkIndexWriter;
use ingestrs::infrastructure::index::memory::InMemoryIndexer;
use ingestrs::infrastructure::repositories::memory::InMemoryStore;
use ingestrs::infrastructure::storage::InMemoryStorage;
use ingestrs::queue::crawl_scheduler::CrawlScheduler;
use ingestrs::queue::task_queue::{DbTaskQueue, TaskQueue};
use ingestrs::utils::robots::RobotsCheckerTrait;
use ingestrs::workers::conversion_worker::ConversionWorker;
use ingestrs::workers::crawler_worker::CrawlerWorker;

/// 测试环境：全部内存实现
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub storage: Arc<InMemoryStorage>,
    pub indexer: Arc<InMemoryIndexer>,
    pub writer: Arc<BulkIndexWriter>,
    pub queue: Arc<dyn TaskQueue>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(InMemoryStorage::new());
        let indexer = Arc::new(InMemoryIndexer::new());
        let (writer, _handle) = BulkIndexWriter::spawn(
            indexer.clone(),
            100,
            Duration::from_secs(3600),
            10_000,
        );

        let tasks: Arc<dyn WorkTaskRepository> = store.clone();
        let queue: Arc<dyn TaskQueue> = Arc::new(DbTaskQueue::new(tasks));

        Self {
            store,
            storage,
            indexer,
            writer,
            queue,
        }
    }

    pub fn jobs(&self) -> Arc<dyn JobRepository> {
        self.store.clone()
    }

    pub fn pages(&self) -> Arc<dyn PageRepository> {
        self.store.clone()
    }

    pub fn files(&self) -> Arc<dyn CrawledFileRepository> {
        self.store.clone()
    }

    pub fn tasks(&self) -> Arc<dyn WorkTaskRepository> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> Arc<CrawlScheduler> {
        Arc::new(CrawlScheduler::new(self.jobs(), self.queue.clone()))
    }

    pub fn conversion_worker(&self, converter: Arc<dyn DocumentConverter>) -> ConversionWorker {
        ConversionWorker::new(
            self.jobs(),
            self.pages(),
            self.queue.clone(),
            self.storage.clone(),
            converter,
            self.writer.clone(),
            conversion_settings(),
            worker_settings(),
        )
    }

    pub fn crawler_worker(&self, factory: Arc<dyn EngineFactory>) -> CrawlerWorker {
        CrawlerWorker::new(
            self.jobs(),
            self.files(),
            self.queue.clone(),
            self.storage.clone(),
            factory,
            Arc::new(AllowAllRobots),
            self.writer.clone(),
            crawler_settings(),
            worker_settings(),
        )
    }

    /// 处理队列直到没有立即可取的任务
    pub async fn drain(&self, queue: QueueName, mut process: impl AsyncProcessor) {
        let worker_id = Uuid::new_v4();
        for _ in 0..200 {
            match self.queue.dequeue(queue, worker_id).await.unwrap() {
                Some(task) => process.handle(task).await,
                None => break,
            }
        }
    }
}

/// drain用的处理器抽象（conversion/crawler worker共用）
#[async_trait]
pub trait AsyncProcessor {
    async fn handle(&mut self, task: ingestrs::domain::models::work_task::WorkTask);
}

pub struct ConversionProcessor<'a>(pub &'a ConversionWorker);

#[async_trait]
impl AsyncProcessor for ConversionProcessor<'_> {
    async fn handle(&mut self, task: ingestrs::domain::models::work_task::WorkTask) {
        self.0.process(task).await;
    }
}

pub struct CrawlerProcessor<'a>(pub &'a CrawlerWorker);

#[async_trait]
impl AsyncProcessor for CrawlerProcessor<'_> {
    async fn handle(&mut self, task: ingestrs::domain::models::work_task::WorkTask) {
        self.0.process(task).await;
    }
}

pub fn conversion_settings() -> ConversionSettings {
    ConversionSettings {
        max_pages_per_document: 2000,
        result_ttl_seconds: 3600,
        converter_url: "http://localhost:8100/convert".to_string(),
        inline_markdown_max_bytes: 64 * 1024,
        merge_grace_minutes: 30,
        merge_retry_delay_seconds: 1,
        queue_backpressure_depth: 1000,
    }
}

pub fn crawler_settings() -> CrawlerSettings {
    CrawlerSettings {
        max_concurrent_downloads: 5,
        max_concurrent_assets: 10,
        download_timeout_seconds: 10,
        user_agent: "ingestrs-test".to_string(),
        respect_robots_txt: false,
        rate_limit_per_second: 100,
        per_host_delay_ms: 0,
        default_engine: "html_parser".to_string(),
        headless_timeout_seconds: 5,
        max_retries: 3,
        retry_delay_base_seconds: 1,
    }
}

pub fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        conversion_workers: 1,
        crawler_workers: 1,
        soft_timeout_seconds: 55 * 60,
        hard_timeout_seconds: 60 * 60,
        temp_path: std::env::temp_dir()
            .join(format!("ingestrs-test-{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned(),
    }
}

pub fn monitoring_settings() -> MonitoringSettings {
    MonitoringSettings {
        enabled: true,
        check_interval_minutes: 5,
        stuck_threshold_minutes: 30,
    }
}

/// 永远放行的robots替身
pub struct AllowAllRobots;

#[async_trait]
impl RobotsCheckerTrait for AllowAllRobots {
    async fn is_allowed(&self, _url: &str, _user_agent: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_crawl_delay(&self, _url: &str, _user_agent: &str) -> Result<Option<Duration>> {
        Ok(None)
    }
}

// ----------------------------------------------------------------------
// 脚本化爬取引擎
// ----------------------------------------------------------------------

/// 单次尝试的抓取脚本
#[derive(Clone)]
pub enum FakeCrawl {
    Ok { links: Vec<String>, html: String },
    Http(u16),
    Timeout,
    Javascript(String),
}

/// 单次尝试的下载脚本：url -> 内容或HTTP状态
#[derive(Clone, Default)]
pub struct FakeAttempt {
    pub crawl: Option<FakeCrawl>,
    pub downloads: HashMap<String, Result<Vec<u8>, u16>>,
}

/// 每次build()弹出一份尝试脚本的引擎工厂
pub struct FakeEngineFactory {
    attempts: Mutex<VecDeque<FakeAttempt>>,
}

impl FakeEngineFactory {
    pub fn new(attempts: Vec<FakeAttempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(attempts.into()),
        })
    }
}

impl EngineFactory for FakeEngineFactory {
    fn build(
        &self,
        kind: EngineKind,
        _proxy: Option<&ingestrs::domain::models::crawler_config::ProxyConfig>,
    ) -> Result<Arc<dyn CrawlEngine>, EngineError> {
        let attempt = self
            .attempts
            .try_lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .unwrap_or_default();
        Ok(Arc::new(FakeEngine { kind, attempt }))
    }
}

pub struct FakeEngine {
    kind: EngineKind,
    attempt: FakeAttempt,
}

#[async_trait]
impl CrawlEngine for FakeEngine {
    async fn crawl_page(
        &self,
        url: &str,
        _file_extensions: &[String],
    ) -> Result<CrawlOutput, EngineError> {
        match self.attempt.crawl.clone() {
            Some(FakeCrawl::Ok { links, html }) => Ok(CrawlOutput {
                url: url.to_string(),
                links,
                html,
                status_code: 200,
            }),
            Some(FakeCrawl::Http(status)) => Err(EngineError::HttpStatus(status)),
            Some(FakeCrawl::Timeout) => Err(EngineError::Timeout),
            Some(FakeCrawl::Javascript(message)) => Err(EngineError::Javascript(message)),
            None => Ok(CrawlOutput {
                url: url.to_string(),
                links: Vec::new(),
                html: "<html></html>".to_string(),
                status_code: 200,
            }),
        }
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadOutput, EngineError> {
        match self.attempt.downloads.get(url) {
            Some(Ok(bytes)) => {
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| EngineError::Other(e.to_string()))?;
                }
                tokio::fs::write(destination, bytes)
                    .await
                    .map_err(|e| EngineError::Other(e.to_string()))?;
                Ok(DownloadOutput {
                    url: url.to_string(),
                    path: destination.to_path_buf(),
                    size_bytes: bytes.len() as u64,
                    content_type: Some("application/pdf".to_string()),
                })
            }
            Some(Err(status)) => Err(EngineError::HttpStatus(*status)),
            None => Err(EngineError::HttpStatus(404)),
        }
    }

    async fn extract_assets(
        &self,
        _html: &str,
        _base_url: &str,
        _asset_types: &[AssetType],
    ) -> Result<HashMap<AssetType, Vec<String>>, EngineError> {
        Ok(HashMap::new())
    }

    async fn download_assets(
        &self,
        _assets: &HashMap<AssetType, Vec<String>>,
        _destination: &Path,
        _max_concurrent: usize,
    ) -> Result<HashMap<AssetType, Vec<AssetDownload>>, EngineError> {
        Ok(HashMap::new())
    }

    async fn close(&self) {}

    fn kind(&self) -> EngineKind {
        self.kind
    }
}

/// 建一个已入库的active爬虫作业
pub async fn seeded_crawler(
    harness: &Harness,
    url: &str,
    config: CrawlerConfig,
    schedule: CrawlerSchedule,
) -> Job {
    let normalized = ingestrs::domain::services::url_normalizer::normalize(url).unwrap();
    let pattern = ingestrs::domain::services::url_normalizer::pattern(url).unwrap();
    let job = Job::new_crawler(
        Uuid::new_v4(),
        normalized,
        pattern,
        "test crawler".to_string(),
        config,
        schedule,
    );
    harness.jobs().create(&job).await.unwrap();
    job
}

/// 组一个N页PDF测试文档
pub fn multi_page_pdf(pages: usize) -> Vec<u8> {
    let sources: Vec<(String, Vec<u8>)> = (0..pages)
        .map(|i| {
            (
                format!("page-{}.pdf", i + 1),
                ingestrs::utils::pdf::minimal_pdf(&format!("Page {}", i + 1)),
            )
        })
        .collect();
    ingestrs::utils::pdf::merge_documents(&sources).unwrap().bytes
}

#[allow(dead_code)]
pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("ingestrs-{}", Uuid::new_v4()))
}
