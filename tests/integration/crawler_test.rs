// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use ingestrs::domain::models::crawled_file::FileStatus;
use ingestrs::domain::models::crawler_config::{
    AssetType, CrawlerConfig, CrawlerMode, EngineKind, PdfHandling, RetryStep,
};
use ingestrs::domain::models::crawler_schedule::CrawlerSchedule;
use ingestrs::domain::models::job::JobStatus;
use ingestrs::domain::models::retry_history::AttemptStatus;
use ingestrs::domain::models::work_task::{ExecuteCrawlerPayload, QueueName, TaskKind, WorkTask};
use ingestrs::domain::repositories::storage_repository::ObjectStore;
use ingestrs::queue::task_queue::TaskQueue;
use ingestrs::utils::pdf::minimal_pdf;

use super::helpers::{
    seeded_crawler, CrawlerProcessor, FakeAttempt, FakeCrawl, FakeEngineFactory, Harness,
};

fn filtered_pdf_config() -> CrawlerConfig {
    CrawlerConfig {
        mode: CrawlerMode::PageWithFiltered,
        engine: EngineKind::HtmlParser,
        asset_types: vec![AssetType::Documents],
        file_extensions: vec!["pdf".to_string()],
        pdf_handling: PdfHandling::Individual,
        retry_strategy: vec![RetryStep {
            attempt: 0,
            engine: EngineKind::HtmlParser,
            use_proxy: false,
            delay_seconds: 0,
        }],
        ..Default::default()
    }
}

async fn enqueue_trigger(harness: &Harness, crawler_id: Uuid) -> chrono::DateTime<Utc> {
    let fire_instant = Utc::now();
    let payload = ExecuteCrawlerPayload {
        crawler_job_id: crawler_id,
        fire_instant,
    };
    harness
        .queue
        .enqueue(WorkTask::new(
            TaskKind::ExecuteCrawler,
            serde_json::to_value(&payload).unwrap(),
        ))
        .await
        .unwrap();
    fire_instant
}

#[tokio::test]
async fn test_static_site_crawl_with_partial_failure() {
    let harness = Harness::new();

    // 页面列出三个PDF：两个下载成功，一个404
    let links = vec![
        "https://example.com/docs/a.pdf".to_string(),
        "https://example.com/docs/b.pdf".to_string(),
        "https://example.com/docs/c.pdf".to_string(),
    ];
    let mut downloads: HashMap<String, Result<Vec<u8>, u16>> = HashMap::new();
    downloads.insert(links[0].clone(), Ok(minimal_pdf("A")));
    downloads.insert(links[1].clone(), Ok(minimal_pdf("B")));
    downloads.insert(links[2].clone(), Err(404));

    let factory = FakeEngineFactory::new(vec![FakeAttempt {
        crawl: Some(FakeCrawl::Ok {
            links,
            html: "<html>docs</html>".to_string(),
        }),
        downloads,
    }]);
    let worker = harness.crawler_worker(factory);

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/docs",
        filtered_pdf_config(),
        CrawlerSchedule::one_time(Utc::now()),
    )
    .await;

    enqueue_trigger(&harness, crawler.id).await;
    harness
        .drain(QueueName::Crawler, CrawlerProcessor(&worker))
        .await;

    let executions = harness
        .jobs()
        .find_crawler_executions(crawler.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, JobStatus::Completed);

    let meta = execution.execution_meta.as_ref().unwrap();
    assert_eq!(meta.engine_used, Some(EngineKind::HtmlParser));
    assert_eq!(meta.proxy_used, Some(false));
    assert_eq!(meta.files_downloaded, 2);
    assert_eq!(meta.files_failed, 1);

    let files = harness
        .files()
        .list_by_execution(execution.id)
        .await
        .unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(
        files
            .iter()
            .filter(|f| f.status == FileStatus::Downloaded)
            .count(),
        2
    );
    assert_eq!(
        files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count(),
        1
    );

    // P7: downloaded行必须有存储路径、公开URL与准确的字节数
    for file in files.iter().filter(|f| f.status == FileStatus::Downloaded) {
        let storage_path = file.storage_path.as_deref().unwrap();
        assert!(file.public_url.is_some());
        let key = storage_path.strip_prefix("crawled/").unwrap();
        let stored = harness
            .storage
            .get("crawled", key)
            .await
            .unwrap();
        assert_eq!(stored.len() as i64, file.size_bytes);
    }
}

#[tokio::test]
async fn test_engine_fallback_succeeds_on_third_attempt() {
    let harness = Harness::new();

    // html/no-proxy 403 → html/proxy timeout → headless成功
    let factory = FakeEngineFactory::new(vec![
        FakeAttempt {
            crawl: Some(FakeCrawl::Http(403)),
            downloads: HashMap::new(),
        },
        FakeAttempt {
            crawl: Some(FakeCrawl::Timeout),
            downloads: HashMap::new(),
        },
        FakeAttempt {
            crawl: Some(FakeCrawl::Ok {
                links: Vec::new(),
                html: "<html>rendered</html>".to_string(),
            }),
            downloads: HashMap::new(),
        },
    ]);
    let worker = harness.crawler_worker(factory);

    let mut config = filtered_pdf_config();
    config.proxy = Some(ingestrs::domain::models::crawler_config::ProxyConfig {
        host: "proxy.internal".to_string(),
        port: 8080,
        protocol: "http".to_string(),
        username: None,
        password: None,
    });
    config.retry_strategy = vec![
        RetryStep { attempt: 0, engine: EngineKind::HtmlParser, use_proxy: false, delay_seconds: 0 },
        RetryStep { attempt: 1, engine: EngineKind::HtmlParser, use_proxy: true, delay_seconds: 0 },
        RetryStep { attempt: 2, engine: EngineKind::HeadlessBrowser, use_proxy: false, delay_seconds: 0 },
    ];

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/app",
        config,
        CrawlerSchedule::one_time(Utc::now()),
    )
    .await;

    enqueue_trigger(&harness, crawler.id).await;
    harness
        .drain(QueueName::Crawler, CrawlerProcessor(&worker))
        .await;

    let executions = harness
        .jobs()
        .find_crawler_executions(crawler.id)
        .await
        .unwrap();
    let execution = &executions[0];
    assert_eq!(execution.status, JobStatus::Completed);

    let meta = execution.execution_meta.as_ref().unwrap();
    assert_eq!(meta.retry_history.len(), 3);
    assert_eq!(meta.retry_history[0].status, AttemptStatus::Failed);
    assert_eq!(meta.retry_history[1].status, AttemptStatus::Failed);
    assert_eq!(meta.retry_history[2].status, AttemptStatus::Success);
    assert_eq!(meta.engine_used, Some(EngineKind::HeadlessBrowser));
    assert_eq!(meta.proxy_used, Some(false));
}

#[tokio::test]
async fn test_single_entry_strategy_surfaces_terminal_error() {
    let harness = Harness::new();

    let factory = FakeEngineFactory::new(vec![FakeAttempt {
        crawl: Some(FakeCrawl::Http(404)),
        downloads: HashMap::new(),
    }]);
    let worker = harness.crawler_worker(factory);

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/gone",
        filtered_pdf_config(),
        CrawlerSchedule::one_time(Utc::now()),
    )
    .await;

    enqueue_trigger(&harness, crawler.id).await;
    harness
        .drain(QueueName::Crawler, CrawlerProcessor(&worker))
        .await;

    let executions = harness
        .jobs()
        .find_crawler_executions(crawler.id)
        .await
        .unwrap();
    let execution = &executions[0];
    assert_eq!(execution.status, JobStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("404"));

    let meta = execution.execution_meta.as_ref().unwrap();
    assert_eq!(meta.retry_history.len(), 1);
    assert_eq!(meta.engine_used, Some(EngineKind::HtmlParser));
    assert_eq!(meta.proxy_used, Some(false));
}

#[tokio::test]
async fn test_duplicate_triggers_produce_single_execution() {
    let harness = Harness::new();

    let factory = FakeEngineFactory::new(vec![FakeAttempt {
        crawl: Some(FakeCrawl::Ok {
            links: Vec::new(),
            html: "<html></html>".to_string(),
        }),
        downloads: HashMap::new(),
    }]);
    let worker = harness.crawler_worker(factory);

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/dup",
        filtered_pdf_config(),
        CrawlerSchedule::one_time(Utc::now()),
    )
    .await;

    // 同一 (crawler, fire_instant) 投递两次
    let fire_instant = Utc::now();
    for _ in 0..2 {
        let payload = ExecuteCrawlerPayload {
            crawler_job_id: crawler.id,
            fire_instant,
        };
        harness
            .queue
            .enqueue(WorkTask::new(
                TaskKind::ExecuteCrawler,
                serde_json::to_value(&payload).unwrap(),
            ))
            .await
            .unwrap();
    }

    harness
        .drain(QueueName::Crawler, CrawlerProcessor(&worker))
        .await;

    // 恰好一行执行；第二个触发无副作用退出
    let executions = harness
        .jobs()
        .find_crawler_executions(crawler.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_trigger_for_paused_crawler_is_discarded() {
    let harness = Harness::new();

    let factory = FakeEngineFactory::new(Vec::new());
    let worker = harness.crawler_worker(factory);

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/paused",
        filtered_pdf_config(),
        CrawlerSchedule::one_time(Utc::now()),
    )
    .await;
    enqueue_trigger(&harness, crawler.id).await;

    // 触发入队后暂停爬虫
    ingestrs::domain::repositories::job_repository::update_with_retry(
        harness.jobs().as_ref(),
        crawler.id,
        |job| job.pause(),
    )
    .await
    .unwrap();

    harness
        .drain(QueueName::Crawler, CrawlerProcessor(&worker))
        .await;

    let executions = harness
        .jobs()
        .find_crawler_executions(crawler.id)
        .await
        .unwrap();
    assert!(executions.is_empty());
}
