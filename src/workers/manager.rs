// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::workers::conversion_worker::ConversionWorker;
use crate::workers::crawler_worker::CrawlerWorker;

/// 工作管理器
///
/// 每个进程托管一个worker池：conversion与crawler各N个循环，
/// 单个worker一次处理一个任务
pub struct WorkerManager {
    conversion: Arc<ConversionWorker>,
    crawler: Arc<CrawlerWorker>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new(conversion: Arc<ConversionWorker>, crawler: Arc<CrawlerWorker>) -> Self {
        Self {
            conversion,
            crawler,
            handles: Vec::new(),
        }
    }

    /// 启动工作进程
    pub fn start_workers(&mut self, conversion_count: usize, crawler_count: usize) {
        for _ in 0..conversion_count {
            let worker = self.conversion.clone();
            self.handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        for _ in 0..crawler_count {
            let worker = self.crawler.clone();
            self.handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }

        info!(
            "started {} conversion and {} crawler workers",
            conversion_count, crawler_count
        );
    }

    /// 等待关闭信号并关闭工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }

        info!("Shutting down workers...");
        for handle in &self.handles {
            handle.abort();
        }

        info!("Workers shut down successfully");
    }
}
