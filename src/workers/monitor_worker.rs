// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::settings::MonitoringSettings;
use crate::domain::repositories::job_repository::{update_with_retry, JobRepository};
use crate::domain::repositories::progress_index::IndexStream;
use crate::domain::repositories::work_task_repository::WorkTaskRepository;
use crate::infrastructure::index::bulk_writer::BulkIndexWriter;

/// 监控工作器
///
/// 周期维护：回收锁过期的队列任务（崩溃worker重投递）、
/// 取消过TTL的触发、把processing超阈值的作业标记失败
pub struct MonitorWorker {
    jobs: Arc<dyn JobRepository>,
    tasks: Arc<dyn WorkTaskRepository>,
    writer: Arc<BulkIndexWriter>,
    settings: MonitoringSettings,
}

impl MonitorWorker {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        tasks: Arc<dyn WorkTaskRepository>,
        writer: Arc<BulkIndexWriter>,
        settings: MonitoringSettings,
    ) -> Self {
        Self {
            jobs,
            tasks,
            writer,
            settings,
        }
    }

    /// 启动监控循环
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.settings.enabled {
                info!("monitoring disabled");
                return;
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(
                self.settings.check_interval_minutes * 60,
            ));

            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// 单轮维护，拆出便于测试
    pub async fn tick(&self) {
        let stuck_threshold = ChronoDuration::minutes(self.settings.stuck_threshold_minutes);

        match self.tasks.reset_stuck(stuck_threshold).await {
            Ok(count) if count > 0 => info!("requeued {} stuck tasks", count),
            Ok(_) => {}
            Err(e) => error!("failed to reset stuck tasks: {}", e),
        }

        match self.tasks.expire_overdue().await {
            Ok(count) if count > 0 => info!("cancelled {} expired triggers", count),
            Ok(_) => {}
            Err(e) => error!("failed to expire overdue triggers: {}", e),
        }

        let threshold = Utc::now() - stuck_threshold;
        match self.jobs.find_stuck(threshold).await {
            Ok(stuck) => {
                for job in stuck {
                    let message = format!(
                        "job stuck in processing for more than {} minutes",
                        self.settings.stuck_threshold_minutes
                    );
                    let result = update_with_retry(self.jobs.as_ref(), job.id, |job| {
                        if !job.is_terminal() {
                            job.fail(&message)?;
                        }
                        Ok(())
                    })
                    .await;

                    match result {
                        Ok(_) => {
                            info!("marked stuck job {} as failed", job.id);
                            self.writer
                                .enqueue(
                                    IndexStream::JobEvents,
                                    json!({
                                        "event": "job_stuck",
                                        "job_id": job.id,
                                        "timestamp": Utc::now().to_rfc3339(),
                                    }),
                                )
                                .await;
                        }
                        Err(e) => error!("failed to mark stuck job {}: {}", job.id, e),
                    }
                }
            }
            Err(e) => error!("stuck job scan failed: {}", e),
        }
    }
}
