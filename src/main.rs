// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use ingestrs::config::settings::Settings;
use ingestrs::domain::repositories::crawled_file_repository::CrawledFileRepository;
use ingestrs::domain::repositories::job_repository::JobRepository;
use ingestrs::domain::repositories::page_repository::PageRepository;
use ingestrs::domain::repositories::work_task_repository::WorkTaskRepository;
use ingestrs::domain::services::converter::DocumentConverter;
use ingestrs::engines::factory::{DefaultEngineFactory, EngineFactory};
use ingestrs::infrastructure::converter::HttpConverter;
use ingestrs::infrastructure::database::connection;
use ingestrs::infrastructure::index::bulk_writer::BulkIndexWriter;
use ingestrs::infrastructure::index::create_indexer;
use ingestrs::infrastructure::repositories::crawled_file_repo_impl::CrawledFileRepositoryImpl;
use ingestrs::infrastructure::repositories::job_repo_impl::JobRepositoryImpl;
use ingestrs::infrastructure::repositories::page_repo_impl::PageRepositoryImpl;
use ingestrs::infrastructure::repositories::work_task_repo_impl::WorkTaskRepositoryImpl;
use ingestrs::infrastructure::storage::create_object_store;
use ingestrs::queue::crawl_scheduler::CrawlScheduler;
use ingestrs::queue::task_queue::{DbTaskQueue, TaskQueue};
use ingestrs::utils::robots::{RobotsChecker, RobotsCheckerTrait};
use ingestrs::utils::telemetry;
use ingestrs::workers::conversion_worker::ConversionWorker;
use ingestrs::workers::crawler_worker::CrawlerWorker;
use ingestrs::workers::manager::WorkerManager;
use ingestrs::workers::monitor_worker::MonitorWorker;

use migration::{Migrator, MigratorTrait};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 应用程序入口
///
/// 服务模式：
/// - `worker`    只跑worker池与监控
/// - `scheduler` 只跑爬虫调度器
/// - `all`       单进程全跑（默认，开发用）
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();
    info!("Starting ingestrs...");

    let settings = Arc::new(Settings::new()?);
    info!("Configuration loaded");

    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Database connection established");

    info!("Running database migrations...");
    Migrator::up(db.as_ref(), None).await?;
    info!("Database migrations applied");

    // 核心组件
    let jobs: Arc<dyn JobRepository> = Arc::new(JobRepositoryImpl::new(db.clone()));
    let pages: Arc<dyn PageRepository> = Arc::new(PageRepositoryImpl::new(db.clone()));
    let files: Arc<dyn CrawledFileRepository> =
        Arc::new(CrawledFileRepositoryImpl::new(db.clone()));
    let tasks: Arc<dyn WorkTaskRepository> = Arc::new(WorkTaskRepositoryImpl::new(db.clone()));

    let queue: Arc<dyn TaskQueue> = Arc::new(DbTaskQueue::new(tasks.clone()));
    let storage = create_object_store(&settings.storage);

    let indexer = create_indexer(&settings.indexer);
    let (writer, _writer_handle) = BulkIndexWriter::spawn(
        indexer,
        settings.indexer.flush_max_docs,
        Duration::from_secs(settings.indexer.flush_interval_seconds),
        settings.indexer.buffer_capacity,
    );

    let converter: Arc<dyn DocumentConverter> = Arc::new(HttpConverter::new(
        settings.conversion.converter_url.clone(),
        Duration::from_secs(settings.crawler.download_timeout_seconds),
    ));
    let engine_factory: Arc<dyn EngineFactory> =
        Arc::new(DefaultEngineFactory::new(&settings.crawler));
    let robots: Arc<dyn RobotsCheckerTrait> = Arc::new(RobotsChecker::new());

    let scheduler = Arc::new(CrawlScheduler::new(jobs.clone(), queue.clone()));

    let args: Vec<String> = std::env::args().collect();
    let service_type = args.get(1).map(String::as_str).unwrap_or("all");

    let run_scheduler = matches!(service_type, "scheduler" | "all");
    let run_workers = matches!(service_type, "worker" | "all");

    if !run_scheduler && !run_workers {
        error!(
            "Invalid service type: '{}'. Use 'worker', 'scheduler' or 'all'.",
            service_type
        );
        std::process::exit(1);
    }

    let mut scheduler_handle = None;
    if run_scheduler {
        info!("Starting crawl scheduler...");
        scheduler.rehydrate().await?;
        scheduler_handle = Some(scheduler.clone().start());
    }

    if run_workers {
        info!("Starting worker service...");

        let conversion_worker = Arc::new(ConversionWorker::new(
            jobs.clone(),
            pages.clone(),
            queue.clone(),
            storage.clone(),
            converter.clone(),
            writer.clone(),
            settings.conversion.clone(),
            settings.worker.clone(),
        ));
        let crawler_worker = Arc::new(CrawlerWorker::new(
            jobs.clone(),
            files.clone(),
            queue.clone(),
            storage.clone(),
            engine_factory.clone(),
            robots.clone(),
            writer.clone(),
            settings.crawler.clone(),
            settings.worker.clone(),
        ));

        let monitor = Arc::new(MonitorWorker::new(
            jobs.clone(),
            tasks.clone(),
            writer.clone(),
            settings.monitoring.clone(),
        ));
        let _monitor_handle = monitor.start();

        let mut manager = WorkerManager::new(conversion_worker, crawler_worker);
        manager.start_workers(
            settings.worker.conversion_workers,
            settings.worker.crawler_workers,
        );
        manager.wait_for_shutdown().await;
    } else if let Some(handle) = scheduler_handle {
        // 纯调度进程：等ctrl-c
        tokio::signal::ctrl_c().await?;
        handle.abort();
        info!("Scheduler shut down");
    }

    writer.flush().await;
    Ok(())
}
