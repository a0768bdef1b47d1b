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
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::settings::{CrawlerSettings, WorkerSettings};
use crate::domain::models::crawled_file::{CrawledFile, FileStatus};
use crate::domain::models::crawler_config::{AssetType, CrawlerConfig, CrawlerMode, RetryStep};
use crate::domain::models::job::{Job, JobStatus};
use crate::domain::models::work_task::{ExecuteCrawlerPayload, QueueName, TaskKind, WorkTask};
use crate::domain::repositories::crawled_file_repository::CrawledFileRepository;
use crate::domain::repositories::job_repository::{update_with_retry, JobRepository};
use crate::domain::repositories::progress_index::IndexStream;
use crate::domain::repositories::storage_repository::{ObjectStore, BUCKET_CRAWLED};
use crate::domain::services::{duplicate_detector, url_normalizer};
use crate::engines::factory::EngineFactory;
use crate::engines::html_engine::filename_from_url;
use crate::engines::traits::{CrawlEngine, EngineError};
use crate::infrastructure::index::bulk_writer::BulkIndexWriter;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::CoreError;
use crate::utils::pdf;
use crate::utils::robots::RobotsCheckerTrait;
use crate::workers::progress::ProgressTracker;
use crate::workers::retry_engine::{self, AttemptRunner, RetryResult};

/// 爬虫执行工作器
///
/// 消费crawler队列的execute_crawler触发：按fire_instant幂等创建
/// 执行行，由重试引擎驱动逐尝试流水线，产物发布到
/// crawled/{execution_id}/ 前缀下
pub struct CrawlerWorker {
    jobs: Arc<dyn JobRepository>,
    files: Arc<dyn CrawledFileRepository>,
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn ObjectStore>,
    engines: Arc<dyn EngineFactory>,
    robots: Arc<dyn RobotsCheckerTrait>,
    writer: Arc<BulkIndexWriter>,
    settings: CrawlerSettings,
    worker: WorkerSettings,
    worker_id: Uuid,
}

impl CrawlerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        files: Arc<dyn CrawledFileRepository>,
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn ObjectStore>,
        engines: Arc<dyn EngineFactory>,
        robots: Arc<dyn RobotsCheckerTrait>,
        writer: Arc<BulkIndexWriter>,
        settings: CrawlerSettings,
        worker: WorkerSettings,
    ) -> Self {
        Self {
            jobs,
            files,
            queue,
            storage,
            engines,
            robots,
            writer,
            settings,
            worker,
            worker_id: Uuid::new_v4(),
        }
    }

    /// 运行工作器循环
    pub async fn run(&self) {
        info!("crawler worker {} started", self.worker_id);

        loop {
            match self.queue.dequeue(QueueName::Crawler, self.worker_id).await {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => sleep(Duration::from_secs(1)).await,
                Err(e) => {
                    error!("crawler dequeue failed: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn process(&self, task: WorkTask) {
        if task.kind != TaskKind::ExecuteCrawler {
            warn!("unexpected task kind {} on crawler queue", task.kind);
            let _ = self.queue.cancel(task.id).await;
            return;
        }

        let soft_timeout = Duration::from_secs(self.worker.soft_timeout_seconds);
        let outcome = match tokio::time::timeout(soft_timeout, self.handle_execute(&task)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Transient(format!(
                "execution exceeded soft time limit of {}s",
                self.worker.soft_timeout_seconds
            ))),
        };

        let ack = match outcome {
            Ok(()) => self.queue.complete(task.id).await,
            Err(e) if e.is_retryable() && task.can_retry() => {
                let delay = chrono::Duration::seconds(
                    30 * 2i64.pow(task.attempt_count.max(0) as u32),
                );
                warn!("execution task {} retrying in {}s: {}", task.id, delay.num_seconds(), e);
                self.queue
                    .reschedule(&task, Utc::now() + delay)
                    .await
                    .map(|_| ())
            }
            Err(e) => {
                error!("execution task {} failed terminally: {}", task.id, e);
                self.queue.fail(task.id).await
            }
        };

        if let Err(e) = ack {
            error!("failed to ack crawler task {}: {}", task.id, e);
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle_execute(&self, task: &WorkTask) -> Result<(), CoreError> {
        let payload: ExecuteCrawlerPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| CoreError::InvalidInput(format!("bad execute payload: {}", e)))?;

        let Some(crawler) = self
            .jobs
            .find_by_id(payload.crawler_job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
        else {
            warn!("crawler {} vanished, dropping trigger", payload.crawler_job_id);
            return Ok(());
        };

        // 暂停/删除后的遗留触发：出队即丢弃
        if crawler.status != JobStatus::Active {
            info!(
                "crawler {} is {}, discarding trigger",
                crawler.id, crawler.status
            );
            return Ok(());
        }

        // 同一 (crawler, fire_instant) 已有执行：无副作用退出
        if let Some(existing) = self
            .jobs
            .find_execution_by_fire_instant(crawler.id, payload.fire_instant)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
        {
            info!(
                "execution {} already covers fire instant {}, skipping duplicate",
                existing.id, payload.fire_instant
            );
            return Ok(());
        }

        let execution = Job::new_execution(&crawler, payload.fire_instant);
        self.jobs
            .create(&execution)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        // 并发创建竞争：同一fire_instant下最早创建的行胜出，其余取消
        let peers = self
            .jobs
            .find_crawler_executions(crawler.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        let winner = peers
            .iter()
            .filter(|j| {
                j.execution_meta
                    .as_ref()
                    .and_then(|m| m.fire_instant)
                    == Some(payload.fire_instant)
            })
            .min_by_key(|j| (j.created_at, j.id));
        if winner.map(|j| j.id) != Some(execution.id) {
            self.update_job(execution.id, |job| {
                job.cancel()?;
                Ok(())
            })
            .await?;
            return Ok(());
        }

        self.run_execution(&crawler, execution).await
    }

    async fn run_execution(&self, crawler: &Job, execution: Job) -> Result<(), CoreError> {
        let config = execution
            .crawler_config
            .clone()
            .ok_or_else(|| CoreError::InvalidInput("execution has no crawler config".to_string()))?;
        config
            .validate()
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        let seed_url = execution
            .source_url
            .clone()
            .ok_or_else(|| CoreError::InvalidInput("crawler has no source url".to_string()))?;
        url_normalizer::validate(&seed_url)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        self.update_job(execution.id, |job| {
            if job.status == JobStatus::Queued {
                job.start()?;
            }
            Ok(())
        })
        .await?;

        let strategy = config.effective_strategy();
        let tracker = Arc::new(ProgressTracker::new(
            self.jobs.clone(),
            self.writer.clone(),
            execution.id,
        ));
        let temp_root = PathBuf::from(&self.worker.temp_path).join(execution.id.to_string());

        let mut attempt = CrawlAttempt {
            jobs: self.jobs.clone(),
            files: self.files.clone(),
            storage: self.storage.clone(),
            engines: self.engines.clone(),
            robots: self.robots.clone(),
            tracker: tracker.clone(),
            settings: self.settings.clone(),
            execution_id: execution.id,
            seed_url: seed_url.clone(),
            config: config.clone(),
            temp_root: temp_root.clone(),
            attempt_index: 0,
        };

        let outcome = retry_engine::drive(&strategy, &mut attempt).await;

        // 临时目录保证释放
        let _ = tokio::fs::remove_dir_all(&temp_root).await;

        for entry in &outcome.history {
            self.writer
                .enqueue(
                    IndexStream::RetryMetrics,
                    json!({
                        "execution_id": execution.id,
                        "crawler_job_id": crawler.id,
                        "attempt": entry.attempt,
                        "engine": entry.engine.to_string(),
                        "use_proxy": entry.use_proxy,
                        "status": entry.status,
                        "error_type": entry.error_type.map(|e| e.to_string()),
                        "duration_seconds": entry.duration_seconds,
                        "timestamp": entry.completed_at.to_rfc3339(),
                    }),
                )
                .await;
        }

        let counts = self
            .files
            .count_by_status(execution.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        // 取消动作写在作业行上：结果直接丢弃
        let current = self
            .jobs
            .find_by_id(execution.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(execution.id.to_string()))?;
        let was_cancelled = current.status == JobStatus::Cancelled;

        let history = outcome.history.clone();
        let engine_used = outcome.engine_used;
        let proxy_used = outcome.proxy_used;
        let result = outcome.result.clone();

        let execution = self
            .update_job(execution.id, move |job| {
                if let Some(meta) = job.execution_meta.as_mut() {
                    meta.engine_used = engine_used;
                    meta.proxy_used = proxy_used;
                    meta.retry_history = history.clone();
                    meta.files_downloaded = counts.downloaded;
                    meta.files_failed = counts.failed;
                    meta.files_skipped = counts.skipped;
                }
                if job.is_terminal() {
                    return Ok(());
                }
                match &result {
                    RetryResult::Succeeded => job.complete()?,
                    RetryResult::Failed { message } => job.fail(message)?,
                    RetryResult::Cancelled => job.cancel()?,
                }
                Ok(())
            })
            .await?;

        if !was_cancelled {
            // 执行计入爬虫作业的通用计数列
            self.update_job(crawler.id, |job| {
                job.total_pages += 1;
                match execution.status {
                    JobStatus::Completed => job.pages_completed += 1,
                    JobStatus::Failed => job.pages_failed += 1,
                    _ => {}
                }
                Ok(())
            })
            .await
            .ok();
        }

        self.writer
            .enqueue(
                IndexStream::JobEvents,
                json!({
                    "event": "execution_finished",
                    "execution_id": execution.id,
                    "crawler_job_id": crawler.id,
                    "status": execution.status.to_string(),
                    "files_downloaded": counts.downloaded,
                    "files_failed": counts.failed,
                    "engine_used": execution.execution_meta.as_ref()
                        .and_then(|m| m.engine_used)
                        .map(|e| e.to_string()),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        tracker
            .final_sample(
                execution.progress,
                json!({
                    "files_processed": counts.downloaded + counts.failed + counts.skipped,
                    "error_count": counts.failed,
                }),
            )
            .await;

        info!(
            "execution {} finished with status {} ({} downloaded, {} failed)",
            execution.id, execution.status, counts.downloaded, counts.failed
        );
        Ok(())
    }

    async fn update_job<F>(&self, id: Uuid, mutate: F) -> Result<Job, CoreError>
    where
        F: FnMut(&mut Job) -> Result<(), crate::domain::models::job::DomainError>,
    {
        update_with_retry(self.jobs.as_ref(), id, mutate)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))
    }
}

/// 一次执行的尝试执行方
///
/// 每次尝试以固定 (engine, use_proxy) 重跑整条流水线：
/// discover → filter → download → pdf → publish；
/// 尝试开始时清掉上一次的文件行，进度从0重记
struct CrawlAttempt {
    jobs: Arc<dyn JobRepository>,
    files: Arc<dyn CrawledFileRepository>,
    storage: Arc<dyn ObjectStore>,
    engines: Arc<dyn EngineFactory>,
    robots: Arc<dyn RobotsCheckerTrait>,
    tracker: Arc<ProgressTracker>,
    settings: CrawlerSettings,
    execution_id: Uuid,
    seed_url: String,
    config: CrawlerConfig,
    temp_root: PathBuf,
    attempt_index: u32,
}

#[async_trait]
impl AttemptRunner for CrawlAttempt {
    async fn attempt(&mut self, step: &RetryStep) -> Result<(), EngineError> {
        self.attempt_index = step.attempt;

        // 重置上一尝试的文件行
        self.files
            .delete_by_execution(self.execution_id)
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;

        let proxy = step.use_proxy.then_some(()).and(self.config.proxy.as_ref());
        let engine = self.engines.build(step.engine, proxy)?;

        let result = self.pipeline(engine.as_ref()).await;
        engine.close().await;
        result
    }

    async fn is_cancelled(&mut self) -> bool {
        matches!(
            self.jobs.find_by_id(self.execution_id).await,
            Ok(Some(job)) if job.status == JobStatus::Cancelled
        )
    }
}

impl CrawlAttempt {
    async fn pipeline(&self, engine: &dyn CrawlEngine) -> Result<(), EngineError> {
        let temp = self.temp_root.join(format!("attempt-{}", self.attempt_index));
        tokio::fs::create_dir_all(&temp)
            .await
            .map_err(|e| EngineError::Other(format!("temp dir: {}", e)))?;

        if self.settings.respect_robots_txt {
            let allowed = self
                .robots
                .is_allowed(&self.seed_url, &self.settings.user_agent)
                .await
                .unwrap_or(true);
            if !allowed {
                return Err(EngineError::Other(format!(
                    "robots.txt disallows crawling {}",
                    self.seed_url
                )));
            }
            if let Ok(Some(delay)) = self
                .robots
                .get_crawl_delay(&self.seed_url, &self.settings.user_agent)
                .await
            {
                sleep(delay).await;
            }
        }

        // 1. Discover（→10%）
        let discovery = self.discover(engine).await?;
        self.tracker
            .report(10, json!({"pages_processed": discovery.pages.len()}))
            .await;

        // 2. Filter（→20%）
        let file_urls = self.filter_links(&discovery.links);
        self.tracker
            .report(20, json!({"files_discovered": file_urls.len()}))
            .await;

        // 3. Download（→70%）
        let downloaded = self.download_files(engine, &file_urls, &temp).await?;
        let assets = self
            .download_assets(engine, &discovery, &file_urls, &temp)
            .await?;
        self.tracker
            .report(
                70,
                json!({
                    "files_processed": downloaded.len(),
                    "bytes_downloaded": downloaded.iter().map(|d| d.file.size_bytes).sum::<i64>(),
                }),
            )
            .await;

        // 4. PDF handling（→80%）
        let merged = self.combine_pdfs(&downloaded).await?;
        self.tracker.report(80, json!({})).await;

        // 5. Publish（→95%）
        self.publish(&discovery, downloaded, assets, merged).await?;
        self.tracker.report(95, json!({})).await;

        Ok(())
    }

    /// 发现：抓seed页，full_website模式按max_depth广度遍历
    async fn discover(&self, engine: &dyn CrawlEngine) -> Result<Discovery, EngineError> {
        let mut discovery = Discovery::default();
        let seed_domain = url_normalizer::extract_domain(&self.seed_url)
            .map_err(|e| EngineError::UrlRejected(e.to_string()))?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        queue.push_back((self.seed_url.clone(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }

            let output = if depth == 0 {
                engine.crawl_page(&url, &[]).await?
            } else {
                match engine.crawl_page(&url, &[]).await {
                    Ok(output) => output,
                    Err(e) => {
                        // 深层页面失败不致命
                        warn!("failed to crawl {} at depth {}: {}", url, depth, e);
                        continue;
                    }
                }
            };

            discovery.links.extend(output.links.iter().cloned());
            discovery.pages.push((url.clone(), output.html.clone()));

            if self.config.mode == CrawlerMode::FullWebsite && depth < self.config.max_depth {
                for link in &output.links {
                    if visited.contains(link) {
                        continue;
                    }
                    let internal = url_normalizer::extract_domain(link)
                        .map(|d| d == seed_domain)
                        .unwrap_or(false);
                    if internal || self.config.follow_external_links {
                        // 只跟HTML风格的页面链接
                        if AssetType::classify(link).is_none() {
                            queue.push_back((link.clone(), depth + 1));
                        }
                    }
                }
            }
        }

        Ok(discovery)
    }

    /// 过滤：扩展名、外链与去重
    fn filter_links(&self, links: &[String]) -> Vec<String> {
        let seed_domain = url_normalizer::extract_domain(&self.seed_url).unwrap_or_default();

        let mut candidates: Vec<String> = links
            .iter()
            .filter(|link| {
                if self.config.file_extensions.is_empty() {
                    // 未配置扩展名时按documents类资源识别
                    AssetType::classify(link) == Some(AssetType::Documents)
                } else {
                    let path = Url::parse(link)
                        .map(|u| u.path().to_lowercase())
                        .unwrap_or_default();
                    self.config
                        .file_extensions
                        .iter()
                        .any(|ext| path.ends_with(&format!(".{}", ext.trim_start_matches('.'))))
                }
            })
            .filter(|link| {
                self.config.follow_external_links
                    || url_normalizer::extract_domain(link)
                        .map(|d| d == seed_domain)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();

        candidates = duplicate_detector::dedupe_urls(&candidates);
        candidates
    }

    /// 有界并发下载选中文件，逐个登记CrawledFile行
    async fn download_files(
        &self,
        engine: &dyn CrawlEngine,
        urls: &[String],
        temp: &std::path::Path,
    ) -> Result<Vec<DownloadedFile>, EngineError> {
        let files_dir = temp.join("files");
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.settings.max_concurrent_downloads.max(1),
        ));

        let mut handles = Vec::new();
        for url in urls {
            let semaphore = semaphore.clone();
            let url = url.clone();
            let destination = files_dir.join(filename_from_url(&url));

            let fut = async move {
                let _permit = semaphore.acquire_owned().await;
                let result = engine.download(&url, &destination).await;
                (url, destination, result)
            };
            handles.push(fut);
        }

        let results = futures::future::join_all(handles).await;
        let mut downloaded = Vec::new();

        for (url, destination, result) in results {
            let filename = filename_from_url(&url);
            let mut file = CrawledFile::new(self.execution_id, url.clone(), filename);

            match result {
                Ok(output) => {
                    file.size_bytes = output.size_bytes as i64;
                    file.mime_type = output.content_type.clone();
                    file.status = FileStatus::Pending; // 发布后才算downloaded
                    self.files
                        .create(&file)
                        .await
                        .map_err(|e| EngineError::Other(e.to_string()))?;
                    downloaded.push(DownloadedFile {
                        file,
                        local_path: destination,
                    });
                }
                Err(e) => {
                    warn!("download failed for {}: {}", url, e);
                    file.mark_failed(&e.to_string());
                    self.files
                        .create(&file)
                        .await
                        .map_err(|e| EngineError::Other(e.to_string()))?;
                }
            }
        }

        Ok(downloaded)
    }

    /// 按模式下载页面资源
    ///
    /// 已被选为文件下载的URL不再按资源重复登记
    async fn download_assets(
        &self,
        engine: &dyn CrawlEngine,
        discovery: &Discovery,
        file_urls: &[String],
        temp: &std::path::Path,
    ) -> Result<Vec<DownloadedFile>, EngineError> {
        if !self.config.downloads_assets() {
            return Ok(Vec::new());
        }
        let Some((_, seed_html)) = discovery.pages.first() else {
            return Ok(Vec::new());
        };

        let asset_types: Vec<AssetType> = if self.config.mode == CrawlerMode::PageWithAll {
            vec![
                AssetType::Css,
                AssetType::Js,
                AssetType::Images,
                AssetType::Fonts,
                AssetType::Videos,
                AssetType::Documents,
            ]
        } else {
            self.config.asset_types.clone()
        };

        let claimed: HashSet<String> = file_urls
            .iter()
            .filter_map(|u| duplicate_detector::file_hash(u).ok())
            .collect();

        let mut asset_urls = engine
            .extract_assets(seed_html, &self.seed_url, &asset_types)
            .await?;
        for urls in asset_urls.values_mut() {
            urls.retain(|u| {
                duplicate_detector::file_hash(u)
                    .map(|h| !claimed.contains(&h))
                    .unwrap_or(false)
            });
        }
        let assets_dir = temp.join("assets");
        let results = engine
            .download_assets(
                &asset_urls,
                &assets_dir,
                self.settings.max_concurrent_assets.max(1),
            )
            .await?;

        let mut downloaded = Vec::new();
        for (asset_type, items) in results {
            for item in items {
                let filename = filename_from_url(&item.url);
                let mut file = CrawledFile::new(self.execution_id, item.url.clone(), filename);
                file.file_type = Some(asset_type.to_string());

                match (&item.path, &item.error) {
                    (Some(path), None) => {
                        file.size_bytes = item.size_bytes as i64;
                        file.mime_type = item.content_type.clone();
                        self.files
                            .create(&file)
                            .await
                            .map_err(|e| EngineError::Other(e.to_string()))?;
                        downloaded.push(DownloadedFile {
                            file,
                            local_path: path.clone(),
                        });
                    }
                    _ => {
                        file.mark_failed(item.error.as_deref().unwrap_or("asset download failed"));
                        self.files
                            .create(&file)
                            .await
                            .map_err(|e| EngineError::Other(e.to_string()))?;
                    }
                }
            }
        }

        Ok(downloaded)
    }

    /// 合并下载到的PDF（combined/both模式），损坏的跳过
    async fn combine_pdfs(
        &self,
        downloaded: &[DownloadedFile],
    ) -> Result<Option<MergedPdf>, EngineError> {
        if !self.config.pdf_handling.wants_combined() {
            return Ok(None);
        }

        let mut sources = Vec::new();
        for item in downloaded.iter().filter(|d| d.file.is_pdf()) {
            match tokio::fs::read(&item.local_path).await {
                Ok(bytes) => sources.push((item.file.filename.clone(), bytes)),
                Err(e) => warn!("cannot read downloaded pdf {}: {}", item.file.filename, e),
            }
        }
        if sources.is_empty() {
            return Ok(None);
        }

        match pdf::merge_documents(&sources) {
            Ok(output) => Ok(Some(MergedPdf {
                bytes: output.bytes,
                source_names: output.merged,
            })),
            Err(e) => {
                // 合并PDF失败永不致命
                warn!("pdf merge failed for execution {}: {}", self.execution_id, e);
                Ok(None)
            }
        }
    }

    /// 发布：上传产物并在文件行上记录存储路径与公开URL
    async fn publish(
        &self,
        discovery: &Discovery,
        downloaded: Vec<DownloadedFile>,
        assets: Vec<DownloadedFile>,
        merged: Option<MergedPdf>,
    ) -> Result<(), EngineError> {
        let prefix = self.execution_id.to_string();

        for (url, html) in &discovery.pages {
            let key = format!("{}/pages/{}.html", prefix, page_name(url));
            self.storage
                .put(BUCKET_CRAWLED, &key, html.as_bytes(), "text/html")
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
        }

        // combined纯模式下单个PDF让位给合并产物
        let suppress_individual_pdfs = merged.is_some()
            && self.config.pdf_handling == crate::domain::models::crawler_config::PdfHandling::Combined;

        for item in downloaded {
            let mut file = item.file;
            if suppress_individual_pdfs && file.is_pdf() {
                file.mark_skipped("superseded by combined pdf");
                self.files
                    .update(&file)
                    .await
                    .map_err(|e| EngineError::Other(e.to_string()))?;
                continue;
            }

            let key = format!("{}/files/{}", prefix, file.filename);
            let bytes = tokio::fs::read(&item.local_path)
                .await
                .map_err(|e| EngineError::Other(format!("read temp file: {}", e)))?;
            self.storage
                .put(
                    BUCKET_CRAWLED,
                    &key,
                    &bytes,
                    file.mime_type.as_deref().unwrap_or("application/octet-stream"),
                )
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
            let public_url = self
                .storage
                .presigned_get(BUCKET_CRAWLED, &key, 86_400)
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;

            file.mark_downloaded(
                format!("{}/{}", BUCKET_CRAWLED, key),
                public_url,
                bytes.len() as i64,
                file.mime_type.clone(),
            );
            self.files
                .update(&file)
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
        }

        for item in assets {
            let mut file = item.file;
            let asset_dir = file.file_type.clone().unwrap_or_else(|| "other".to_string());
            let key = format!("{}/assets/{}/{}", prefix, asset_dir, file.filename);
            let bytes = tokio::fs::read(&item.local_path)
                .await
                .map_err(|e| EngineError::Other(format!("read temp asset: {}", e)))?;
            self.storage
                .put(
                    BUCKET_CRAWLED,
                    &key,
                    &bytes,
                    file.mime_type.as_deref().unwrap_or("application/octet-stream"),
                )
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
            let public_url = self
                .storage
                .presigned_get(BUCKET_CRAWLED, &key, 86_400)
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;

            file.mark_downloaded(
                format!("{}/{}", BUCKET_CRAWLED, key),
                public_url,
                bytes.len() as i64,
                file.mime_type.clone(),
            );
            self.files
                .update(&file)
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
        }

        if let Some(merged) = merged {
            let key = format!("{}/merged/combined.pdf", prefix);
            self.storage
                .put(BUCKET_CRAWLED, &key, &merged.bytes, "application/pdf")
                .await
                .map_err(|e| EngineError::Other(e.to_string()))?;
            info!(
                "published combined pdf for execution {} ({} sources)",
                self.execution_id,
                merged.source_names.len()
            );
        }

        Ok(())
    }
}

/// 发现阶段的产物
#[derive(Default)]
struct Discovery {
    /// (url, html) 按访问顺序
    pages: Vec<(String, String)>,
    /// 所有出链（含重复，filter阶段去重）
    links: Vec<String>,
}

struct DownloadedFile {
    file: CrawledFile,
    local_path: PathBuf,
}

struct MergedPdf {
    bytes: Vec<u8>,
    source_names: Vec<String>,
}

/// 页面URL转安全文件名
fn page_name(url: &str) -> String {
    let base = Url::parse(url)
        .map(|u| {
            let host = u.host_str().unwrap_or("page").to_string();
            let path = u.path().trim_matches('/').replace('/', "_");
            if path.is_empty() {
                host
            } else {
                format!("{}_{}", host, path)
            }
        })
        .unwrap_or_else(|_| "page".to_string());

    base.chars()
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

    #[test]
    fn test_page_name_is_filesystem_safe() {
        assert_eq!(
            page_name("https://example.com/docs/intro"),
            "example.com_docs_intro"
        );
        assert_eq!(page_name("https://example.com/"), "example.com");
        assert!(!page_name("https://example.com/a?b=c").contains('?'));
    }
}
