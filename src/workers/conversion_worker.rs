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

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::settings::{ConversionSettings, WorkerSettings};
use crate::domain::models::job::{Job, JobStatus, JobType};
use crate::domain::models::page::Page;
use crate::domain::models::work_task::{
    ConvertPagePayload, MergePagesPayload, QueueName, SplitPdfPayload, TaskKind, WorkTask,
};
use crate::domain::repositories::job_repository::{update_with_retry, JobRepository};
use crate::domain::repositories::page_repository::PageRepository;
use crate::domain::repositories::progress_index::IndexStream;
use crate::domain::repositories::storage_repository::{
    ObjectStore, StorageError, BUCKET_PAGES, BUCKET_RESULTS, BUCKET_UPLOADS,
};
use crate::domain::services::converter::{ConverterError, DocumentConverter};
use crate::infrastructure::index::bulk_writer::BulkIndexWriter;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::CoreError;
use crate::utils::pdf;

/// 页面markdown合并分隔符
const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// 任务处理结果
enum TaskOutcome {
    /// 效果已提交，ack任务
    Done,
    /// 延迟重新入队（合并等待页面终态等）
    Deferred(chrono::DateTime<chrono::Utc>),
}

/// 转换流水线工作器
///
/// 处理conversion队列的三种任务：split_pdf / convert_page /
/// merge_pages。迟到ack：效果落库后才标记任务完成；
/// 每个任务第一步检查当前作业状态，终态直接幂等退出
pub struct ConversionWorker {
    jobs: Arc<dyn JobRepository>,
    pages: Arc<dyn PageRepository>,
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn ObjectStore>,
    converter: Arc<dyn DocumentConverter>,
    writer: Arc<BulkIndexWriter>,
    settings: ConversionSettings,
    worker: WorkerSettings,
    worker_id: Uuid,
}

impl ConversionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pages: Arc<dyn PageRepository>,
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn ObjectStore>,
        converter: Arc<dyn DocumentConverter>,
        writer: Arc<BulkIndexWriter>,
        settings: ConversionSettings,
        worker: WorkerSettings,
    ) -> Self {
        Self {
            jobs,
            pages,
            queue,
            storage,
            converter,
            writer,
            settings,
            worker,
            worker_id: Uuid::new_v4(),
        }
    }

    /// 运行工作器循环
    pub async fn run(&self) {
        info!("conversion worker {} started", self.worker_id);

        loop {
            match self.queue.dequeue(QueueName::Conversion, self.worker_id).await {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => sleep(Duration::from_secs(1)).await,
                Err(e) => {
                    error!("conversion dequeue failed: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// 处理单个任务，一轮一个
    pub async fn process(&self, task: WorkTask) {
        let soft_timeout = Duration::from_secs(self.worker.soft_timeout_seconds);

        let outcome = match tokio::time::timeout(soft_timeout, self.dispatch(&task)).await {
            Ok(outcome) => outcome,
            // 软超时：抛可重试错误，由下方统一重排
            Err(_) => Err(CoreError::Transient(format!(
                "task exceeded soft time limit of {}s",
                self.worker.soft_timeout_seconds
            ))),
        };

        let ack = match outcome {
            Ok(TaskOutcome::Done) => self.queue.complete(task.id).await,
            Ok(TaskOutcome::Deferred(at)) => self.queue.reschedule(&task, at).await.map(|_| ()),
            Err(e) if e.is_retryable() && task.can_retry() => {
                let delay = ChronoDuration::seconds(30 * 2i64.pow(task.attempt_count.max(0) as u32));
                warn!(
                    "task {} ({}) failed transiently, retrying in {}s: {}",
                    task.id,
                    task.kind,
                    delay.num_seconds(),
                    e
                );
                self.queue
                    .reschedule(&task, Utc::now() + delay)
                    .await
                    .map(|_| ())
            }
            Err(e) => {
                // 未捕获错误：已记录在作业上，ack任务避免热循环
                error!("task {} ({}) failed terminally: {}", task.id, task.kind, e);
                self.record_task_failure(&task, &e).await;
                self.queue.fail(task.id).await
            }
        };

        if let Err(e) = ack {
            error!("failed to ack task {}: {}", task.id, e);
        }
    }

    async fn dispatch(&self, task: &WorkTask) -> Result<TaskOutcome, CoreError> {
        match task.kind {
            TaskKind::SplitPdf => self.handle_split(task).await,
            TaskKind::ConvertPage => self.handle_convert_page(task).await,
            TaskKind::MergePages => self.handle_merge(task).await,
            TaskKind::ExecuteCrawler => {
                warn!("execute_crawler task routed to conversion queue, cancelling");
                Err(CoreError::InvalidInput(
                    "crawler task on conversion queue".to_string(),
                ))
            }
        }
    }

    /// 把终态错误落到负载指向的作业上
    async fn record_task_failure(&self, task: &WorkTask, error: &CoreError) {
        let job_id = task
            .payload
            .get("main_job_id")
            .or_else(|| task.payload.get("page_job_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        if let Some(job_id) = job_id {
            let message = error.to_string();
            let _ = update_with_retry(self.jobs.as_ref(), job_id, |job| {
                if !job.is_terminal() {
                    if job.status == JobStatus::Queued {
                        job.start()?;
                    }
                    job.fail(&message)?;
                }
                Ok(())
            })
            .await;
        }
    }

    // ------------------------------------------------------------------
    // split_pdf
    // ------------------------------------------------------------------

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle_split(&self, task: &WorkTask) -> Result<TaskOutcome, CoreError> {
        let payload: SplitPdfPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| CoreError::InvalidInput(format!("bad split payload: {}", e)))?;

        let Some(main) = self.find_job(payload.main_job_id).await? else {
            warn!("main job {} not found, dropping split task", payload.main_job_id);
            return Ok(TaskOutcome::Done);
        };
        if main.is_terminal() {
            return Ok(TaskOutcome::Done);
        }

        let main = if main.status == JobStatus::Queued {
            self.update_job(main.id, |job| {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                Ok(())
            })
            .await?
        } else {
            main
        };

        self.update_job(payload.split_job_id, |job| {
            if job.status == JobStatus::Queued {
                job.start()?;
            }
            Ok(())
        })
        .await
        .ok();

        let upload_key = main.storage_upload_path.clone().ok_or_else(|| {
            CoreError::Fatal("main job has no uploaded document".to_string())
        })?;

        let bytes = match self.storage.get(BUCKET_UPLOADS, &upload_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(key)) => {
                let message = format!("uploaded document missing: {}", key);
                self.fail_pipeline(&main, payload.split_job_id, &message).await?;
                return Ok(TaskOutcome::Done);
            }
            Err(e) => return Err(CoreError::Transient(e.to_string())),
        };

        // 页数校验：0页按corrupt_input失败，超限拒绝
        let page_count = match pdf::page_count(&bytes) {
            Ok(0) | Err(pdf::PdfError::Corrupt(_)) => {
                let message = "corrupt_input: document has no readable pages".to_string();
                self.fail_pipeline(&main, payload.split_job_id, &message).await?;
                return Ok(TaskOutcome::Done);
            }
            Ok(count) if count > self.settings.max_pages_per_document => {
                let message = format!(
                    "document has {} pages, exceeding the limit of {}",
                    count, self.settings.max_pages_per_document
                );
                self.fail_pipeline(&main, payload.split_job_id, &message).await?;
                return Ok(TaskOutcome::Done);
            }
            Ok(count) => count,
            Err(e) => {
                self.fail_pipeline(&main, payload.split_job_id, &e.to_string()).await?;
                return Ok(TaskOutcome::Done);
            }
        };

        let page_documents = pdf::split_pages(&bytes)
            .map_err(|e| CoreError::Fatal(format!("split failed: {}", e)))?;

        // 背压：conversion队列过深时错开页任务的可取时间
        let depth = self
            .queue
            .depth(QueueName::Conversion)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        let stagger = if depth > self.settings.queue_backpressure_depth {
            ChronoDuration::seconds(1)
        } else {
            ChronoDuration::zero()
        };

        let mut page_rows = Vec::with_capacity(page_documents.len());
        for (index, page_bytes) in page_documents.iter().enumerate() {
            let page_number = (index + 1) as i32;
            let key = format!("{}/page_{:04}.pdf", main.id, page_number);
            self.storage
                .put(BUCKET_PAGES, &key, page_bytes, "application/pdf")
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;

            let page_job = Job::new_child(
                &main,
                JobType::Page,
                format!("{} - page {}", main.name, page_number),
            );
            self.jobs
                .create(&page_job)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;

            let mut page = Page::new(main.id, page_number, key);
            page.page_job_id = Some(page_job.id);
            page_rows.push((page, page_job.id));
        }

        let rows: Vec<Page> = page_rows.iter().map(|(p, _)| p.clone()).collect();
        self.pages
            .upsert_pages(&rows)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        for (index, (page, page_job_id)) in page_rows.iter().enumerate() {
            let payload = ConvertPagePayload {
                main_job_id: main.id,
                page_job_id: *page_job_id,
                page_number: page.page_number,
            };
            let mut task = WorkTask::new(
                TaskKind::ConvertPage,
                serde_json::to_value(&payload)
                    .map_err(|e| CoreError::InvalidInput(e.to_string()))?,
            );
            if stagger > ChronoDuration::zero() {
                task = task.delayed_until(Utc::now() + stagger * (index as i32));
            }
            self.queue
                .enqueue(task)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;
        }

        self.update_job(main.id, |job| {
            job.total_pages = page_count as i32;
            job.record_progress(20);
            Ok(())
        })
        .await?;

        self.update_job(payload.split_job_id, |job| {
            if !job.is_terminal() {
                job.complete()?;
            }
            Ok(())
        })
        .await
        .ok();

        info!("split {} into {} pages", main.id, page_count);
        Ok(TaskOutcome::Done)
    }

    // ------------------------------------------------------------------
    // convert_page
    // ------------------------------------------------------------------

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle_convert_page(&self, task: &WorkTask) -> Result<TaskOutcome, CoreError> {
        let payload: ConvertPagePayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| CoreError::InvalidInput(format!("bad convert payload: {}", e)))?;

        let Some(page_job) = self.find_job(payload.page_job_id).await? else {
            return Ok(TaskOutcome::Done);
        };
        if page_job.is_terminal() {
            return Ok(TaskOutcome::Done);
        }

        let Some(mut page) = self
            .pages
            .find_page(payload.main_job_id, payload.page_number)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
        else {
            self.update_job(payload.page_job_id, |job| {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                job.fail("page row missing")?;
                Ok(())
            })
            .await?;
            return Ok(TaskOutcome::Done);
        };

        // 被RetryPage替换掉的旧page作业：无副作用退出
        if page.page_job_id != Some(payload.page_job_id) {
            self.update_job(payload.page_job_id, |job| {
                job.cancel()?;
                Ok(())
            })
            .await
            .ok();
            return Ok(TaskOutcome::Done);
        }
        if page.is_terminal() {
            return Ok(TaskOutcome::Done);
        }

        if page_job.status == JobStatus::Queued {
            self.update_job(payload.page_job_id, |job| {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                Ok(())
            })
            .await?;
        }
        if page.status == JobStatus::Queued {
            page.status = JobStatus::Processing;
            page.updated_at = Utc::now();
            self.pages
                .update_page(&page)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;
        }

        let page_key = page.storage_page_path.clone().ok_or_else(|| {
            CoreError::Fatal(format!("page {} has no stored blob", page.page_number))
        })?;
        let bytes = match self.storage.get(BUCKET_PAGES, &page_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(key)) => {
                self.finish_page_failure(&mut page, payload.page_job_id, &format!(
                    "page blob missing: {}",
                    key
                ))
                .await?;
                return Ok(TaskOutcome::Done);
            }
            Err(e) => return Err(CoreError::Transient(e.to_string())),
        };

        match self.converter.convert(&bytes, Some("pdf")).await {
            Ok(output) => {
                let (inline, pointer) =
                    if output.markdown.len() <= self.settings.inline_markdown_max_bytes {
                        (Some(output.markdown.clone()), None)
                    } else {
                        let key =
                            format!("{}/page_{:04}.md", payload.main_job_id, page.page_number);
                        self.storage
                            .put(BUCKET_RESULTS, &key, output.markdown.as_bytes(), "text/markdown")
                            .await
                            .map_err(|e| CoreError::Transient(e.to_string()))?;
                        (None, Some(key))
                    };

                page.mark_completed(inline, pointer);
                self.pages
                    .update_page(&page)
                    .await
                    .map_err(|e| CoreError::Transient(e.to_string()))?;

                self.update_job(payload.page_job_id, |job| {
                    if !job.is_terminal() {
                        job.complete()?;
                    }
                    Ok(())
                })
                .await?;

                self.after_page_terminal(payload.main_job_id).await?;
                Ok(TaskOutcome::Done)
            }
            Err(ConverterError::Timeout(message)) if task.can_retry() => {
                // 瞬时转换失败：页面留在队列态，任务按退避重排
                page.status = JobStatus::Queued;
                page.updated_at = Utc::now();
                self.pages
                    .update_page(&page)
                    .await
                    .map_err(|e| CoreError::Transient(e.to_string()))?;
                self.update_job(payload.page_job_id, |job| {
                    if job.status == JobStatus::Processing {
                        job.status = JobStatus::Queued;
                    }
                    Ok(())
                })
                .await
                .ok();
                Err(CoreError::Transient(message))
            }
            Err(e) => {
                self.finish_page_failure(&mut page, payload.page_job_id, &e.to_string())
                    .await?;
                Ok(TaskOutcome::Done)
            }
        }
    }

    async fn finish_page_failure(
        &self,
        page: &mut Page,
        page_job_id: Uuid,
        message: &str,
    ) -> Result<(), CoreError> {
        page.mark_failed(message);
        self.pages
            .update_page(page)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        self.update_job(page_job_id, |job| {
            if !job.is_terminal() {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                job.fail(message)?;
            }
            Ok(())
        })
        .await?;

        self.after_page_terminal(page.job_id).await
    }

    /// 页面进入终态后：更新父作业计数与进度，必要时投递合并
    async fn after_page_terminal(&self, main_job_id: Uuid) -> Result<(), CoreError> {
        let counts = self
            .pages
            .count_by_status(main_job_id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let main = self
            .update_job(main_job_id, |job| {
                job.pages_completed = counts.completed as i32;
                job.pages_failed = counts.failed as i32;
                if job.total_pages > 0 {
                    let pages_progress =
                        (counts.completed as f64 / job.total_pages as f64 * 70.0) as i32;
                    job.record_progress(20 + pages_progress);
                }
                Ok(())
            })
            .await?;

        // completed的主作业仍可因RetryPage落地而重跑合并；
        // failed/cancelled不再动
        if matches!(
            main.status,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Stopped
        ) {
            return Ok(());
        }

        if counts.all_terminal() {
            self.ensure_merge_enqueued(&main).await?;
        }
        Ok(())
    }

    /// 若没有未完成的merge子作业则创建并投递一个
    ///
    /// RetryPage后的页面落地也走这条路，合并随之重跑
    async fn ensure_merge_enqueued(&self, main: &Job) -> Result<(), CoreError> {
        let children = self
            .jobs
            .find_children(main.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        let merge_open = children
            .iter()
            .any(|j| j.job_type == JobType::Merge && !j.is_terminal());
        if merge_open {
            return Ok(());
        }

        let merge_job = Job::new_child(main, JobType::Merge, format!("{} - merge", main.name));
        self.jobs
            .create(&merge_job)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let payload = MergePagesPayload {
            main_job_id: main.id,
            merge_job_id: merge_job.id,
        };
        self.queue
            .enqueue(WorkTask::new(
                TaskKind::MergePages,
                serde_json::to_value(&payload)
                    .map_err(|e| CoreError::InvalidInput(e.to_string()))?,
            ))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // merge_pages
    // ------------------------------------------------------------------

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle_merge(&self, task: &WorkTask) -> Result<TaskOutcome, CoreError> {
        let payload: MergePagesPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| CoreError::InvalidInput(format!("bad merge payload: {}", e)))?;

        let Some(main) = self.find_job(payload.main_job_id).await? else {
            return Ok(TaskOutcome::Done);
        };
        // completed主作业允许重合并（RetryPage后的页面落地）；
        // failed/cancelled的合并任务直接取消
        if matches!(
            main.status,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Stopped
        ) {
            self.update_job(payload.merge_job_id, |job| {
                job.cancel()?;
                Ok(())
            })
            .await
            .ok();
            return Ok(TaskOutcome::Done);
        }

        let counts = self
            .pages
            .count_by_status(main.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        if counts.non_terminal > 0 {
            let last_terminal = self
                .pages
                .last_terminal_transition(main.id)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?
                .or(main.started_at)
                .unwrap_or_else(Utc::now);
            let grace_deadline =
                last_terminal + ChronoDuration::minutes(self.settings.merge_grace_minutes);

            if Utc::now() < grace_deadline {
                // 仍有页面可能落地：延迟重试而不是过早合并
                return Ok(TaskOutcome::Deferred(
                    Utc::now() + ChronoDuration::seconds(self.settings.merge_retry_delay_seconds),
                ));
            }

            // 宽限期已过：未终态页面按失败处理并记录在主作业上
            warn!(
                "merge grace period expired for job {}, failing {} straggler pages",
                main.id, counts.non_terminal
            );
            let rows = self
                .pages
                .get_pages(main.id, main.total_pages.max(1) as u64, 0)
                .await
                .map_err(|e| CoreError::Transient(e.to_string()))?;
            for mut page in rows.into_iter().filter(|p| !p.is_terminal()) {
                page.mark_failed("page did not reach a terminal state before the merge grace period expired");
                self.pages
                    .update_page(&page)
                    .await
                    .map_err(|e| CoreError::Transient(e.to_string()))?;
            }
            self.update_job(main.id, |job| {
                job.error = Some(
                    "one or more pages were forced to failed after the merge grace period"
                        .to_string(),
                );
                Ok(())
            })
            .await?;
        }

        self.update_job(payload.merge_job_id, |job| {
            if job.status == JobStatus::Queued {
                job.start()?;
            }
            Ok(())
        })
        .await
        .ok();

        let rows = self
            .pages
            .get_pages(main.id, main.total_pages.max(1) as u64, 0)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let mut sections = Vec::new();
        for page in rows.iter().filter(|p| p.status == JobStatus::Completed) {
            let markdown = match (&page.markdown_content, &page.storage_markdown_path) {
                (Some(inline), _) => inline.clone(),
                (None, Some(pointer)) => {
                    let bytes = self
                        .storage
                        .get(BUCKET_RESULTS, pointer)
                        .await
                        .map_err(|e| CoreError::Transient(e.to_string()))?;
                    String::from_utf8_lossy(&bytes).into_owned()
                }
                (None, None) => String::new(),
            };
            sections.push(markdown);
        }

        let counts = self
            .pages
            .count_by_status(main.id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        if counts.completed == 0 {
            // 整条流水线没有任何页面成功：按失败收场
            let message = "merge aborted: no page completed successfully";
            self.fail_pipeline(&main, payload.merge_job_id, message).await?;
            return Ok(TaskOutcome::Done);
        }

        let combined = sections.join(PAGE_SEPARATOR);
        let result_key = format!("{}/result.md", main.id);
        self.storage
            .put(BUCKET_RESULTS, &result_key, combined.as_bytes(), "text/markdown")
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let main = self
            .update_job(main.id, |job| {
                job.pages_completed = counts.completed as i32;
                job.pages_failed = counts.failed as i32;
                job.storage_result_path = Some(result_key.clone());
                if !job.is_terminal() {
                    job.complete()?;
                }
                Ok(())
            })
            .await?;

        self.update_job(payload.merge_job_id, |job| {
            if !job.is_terminal() {
                job.complete()?;
            }
            Ok(())
        })
        .await
        .ok();

        self.writer
            .enqueue(
                IndexStream::JobEvents,
                json!({
                    "event": "job_completed",
                    "job_id": main.id,
                    "job_type": main.job_type.to_string(),
                    "pages_total": main.total_pages,
                    "pages_completed": main.pages_completed,
                    "pages_failed": main.pages_failed,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        self.writer.flush().await;

        info!(
            "merged job {}: {} completed, {} failed",
            main.id, main.pages_completed, main.pages_failed
        );
        Ok(TaskOutcome::Done)
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, CoreError> {
        self.jobs
            .find_by_id(id)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))
    }

    async fn update_job<F>(&self, id: Uuid, mutate: F) -> Result<Job, CoreError>
    where
        F: FnMut(&mut Job) -> Result<(), crate::domain::models::job::DomainError>,
    {
        update_with_retry(self.jobs.as_ref(), id, mutate)
            .await
            .map_err(|e| match e {
                crate::domain::repositories::job_repository::RepositoryError::Conflict(m) => {
                    CoreError::Conflict(m)
                }
                crate::domain::repositories::job_repository::RepositoryError::NotFound => {
                    CoreError::NotFound(id.to_string())
                }
                other => CoreError::Transient(other.to_string()),
            })
    }

    /// 流水线致命失败：主作业failed，当前阶段子作业failed
    async fn fail_pipeline(
        &self,
        main: &Job,
        stage_job_id: Uuid,
        message: &str,
    ) -> Result<(), CoreError> {
        self.update_job(stage_job_id, |job| {
            if !job.is_terminal() {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                job.fail(message)?;
            }
            Ok(())
        })
        .await
        .ok();

        self.update_job(main.id, |job| {
            if !job.is_terminal() {
                if job.status == JobStatus::Queued {
                    job.start()?;
                }
                job.fail(message)?;
            }
            Ok(())
        })
        .await?;

        self.writer
            .enqueue(
                IndexStream::JobEvents,
                json!({
                    "event": "job_failed",
                    "job_id": main.id,
                    "error": message,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        self.writer.flush().await;
        Ok(())
    }
}
