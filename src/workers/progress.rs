// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::repositories::job_repository::{update_with_retry, JobRepository};
use crate::domain::repositories::progress_index::IndexStream;
use crate::infrastructure::index::bulk_writer::BulkIndexWriter;

/// 进度节流间隔
const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// 进程内进度跟踪器
///
/// 作业行进度与指标采样都以5秒为节流间隔；
/// 终态转换绕过节流并立刻flush一条最终采样。
/// 作业行进度只增不减，重试时单次尝试的内部进度由调用方归零
pub struct ProgressTracker {
    jobs: Arc<dyn JobRepository>,
    writer: Arc<BulkIndexWriter>,
    job_id: Uuid,
    last_report: Mutex<Option<Instant>>,
}

impl ProgressTracker {
    pub fn new(jobs: Arc<dyn JobRepository>, writer: Arc<BulkIndexWriter>, job_id: Uuid) -> Self {
        Self {
            jobs,
            writer,
            job_id,
            last_report: Mutex::new(None),
        }
    }

    /// 上报进度与一条指标采样（节流）
    pub async fn report(&self, progress: i32, mut sample: Value) {
        {
            let mut last = self.last_report.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < MIN_REPORT_INTERVAL {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        self.write(progress, &mut sample).await;
    }

    /// 终态最终采样：绕过节流并flush
    pub async fn final_sample(&self, progress: i32, mut sample: Value) {
        self.write(progress, &mut sample).await;
        self.writer.flush().await;
    }

    async fn write(&self, progress: i32, sample: &mut Value) {
        if let Some(object) = sample.as_object_mut() {
            object.insert("job_id".to_string(), Value::String(self.job_id.to_string()));
            object.insert(
                "timestamp".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            object.insert("progress".to_string(), Value::from(progress));
        }

        if let Err(e) = update_with_retry(self.jobs.as_ref(), self.job_id, |job| {
            job.record_progress(progress);
            Ok(())
        })
        .await
        {
            // 指标路径失败不影响执行
            warn!("progress update failed for job {}: {}", self.job_id, e);
        }

        self.writer
            .enqueue(IndexStream::ExecutionMetrics, sample.clone())
            .await;
    }
}
