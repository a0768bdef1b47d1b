// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{Duration, Utc};

use ingestrs::domain::models::crawler_schedule::CrawlerSchedule;
use ingestrs::domain::models::job::JobStatus;
use ingestrs::domain::models::work_task::QueueName;
use ingestrs::domain::repositories::job_repository::update_with_retry;
use ingestrs::queue::task_queue::TaskQueue;

use super::helpers::{seeded_crawler, Harness};

fn every_five_minutes() -> CrawlerSchedule {
    CrawlerSchedule::recurring("*/5 * * * *", "America/Sao_Paulo").unwrap()
}

#[tokio::test]
async fn test_recurring_schedule_under_pause_and_resume() {
    let harness = Harness::new();
    let scheduler = harness.scheduler();

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/feed",
        Default::default(),
        every_five_minutes(),
    )
    .await;
    scheduler.register_crawler(crawler.id).await.unwrap();

    // 模拟推进30分钟：*/5的cron恰好6个边界
    let emitted = scheduler.tick(Utc::now() + Duration::minutes(30)).await.unwrap();
    assert_eq!(emitted, 6);
    assert_eq!(
        harness.queue.depth(QueueName::Crawler).await.unwrap(),
        6
    );

    // 暂停后再推进30分钟：不再发射
    update_with_retry(harness.jobs().as_ref(), crawler.id, |job| job.pause())
        .await
        .unwrap();
    scheduler.pause_crawler(crawler.id);

    let emitted = scheduler.tick(Utc::now() + Duration::minutes(60)).await.unwrap();
    assert_eq!(emitted, 0);
    assert_eq!(harness.queue.depth(QueueName::Crawler).await.unwrap(), 6);

    // 恢复：从恢复时刻之后的下一个cron边界开始，不补发
    update_with_retry(harness.jobs().as_ref(), crawler.id, |job| job.resume())
        .await
        .unwrap();
    scheduler.register_crawler(crawler.id).await.unwrap();

    let job = harness.jobs().find_by_id(crawler.id).await.unwrap().unwrap();
    let next = job.crawler_schedule.unwrap().next_execution().unwrap();
    assert!(next > Utc::now());

    let emitted = scheduler.tick(Utc::now() + Duration::minutes(5)).await.unwrap();
    assert!(emitted >= 1);
}

#[tokio::test]
async fn test_next_runs_projection_is_strictly_increasing() {
    let harness = Harness::new();
    let scheduler = harness.scheduler();

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/p6",
        Default::default(),
        every_five_minutes(),
    )
    .await;
    scheduler.register_crawler(crawler.id).await.unwrap();

    let job = harness.jobs().find_by_id(crawler.id).await.unwrap().unwrap();
    let schedule = job.crawler_schedule.unwrap();
    assert!(!schedule.next_runs.is_empty());
    for pair in schedule.next_runs.windows(2) {
        assert!(pair[1] > pair[0], "next_runs not strictly increasing");
    }

    // 投影必须与cron重算一致
    let recomputed = schedule
        .next_n_runs(schedule.next_runs.len(), schedule.next_runs[0] - Duration::seconds(1))
        .unwrap();
    assert_eq!(schedule.next_runs, recomputed);
}

#[tokio::test]
async fn test_one_time_schedule_fires_once_and_unregisters() {
    let harness = Harness::new();
    let scheduler = harness.scheduler();

    let crawler = seeded_crawler(
        &harness,
        "https://example.com/once",
        Default::default(),
        CrawlerSchedule::one_time(Utc::now() + Duration::minutes(1)),
    )
    .await;
    scheduler.register_crawler(crawler.id).await.unwrap();

    let emitted = scheduler.tick(Utc::now() + Duration::minutes(2)).await.unwrap();
    assert_eq!(emitted, 1);

    // 一次性调度发射后自动注销，不再产生触发
    let emitted = scheduler.tick(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(emitted, 0);
}

#[tokio::test]
async fn test_rehydrate_installs_active_crawlers_only() {
    let harness = Harness::new();

    let active = seeded_crawler(
        &harness,
        "https://example.com/active",
        Default::default(),
        every_five_minutes(),
    )
    .await;
    let paused = seeded_crawler(
        &harness,
        "https://example.com/idle",
        Default::default(),
        every_five_minutes(),
    )
    .await;
    update_with_retry(harness.jobs().as_ref(), paused.id, |job| job.pause())
        .await
        .unwrap();

    let scheduler = harness.scheduler();
    let installed = scheduler.rehydrate().await.unwrap();
    assert_eq!(installed, 1);

    let job = harness.jobs().find_by_id(active.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
}
