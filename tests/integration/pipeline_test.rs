// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use uuid::Uuid;

use ingestrs::application::dto::requests::CreateJobRequest;
use ingestrs::application::use_cases::create_job::CreateJobUseCase;
use ingestrs::application::use_cases::manage_jobs::ManageJobsUseCase;
use ingestrs::application::use_cases::retry_page::RetryPageUseCase;
use ingestrs::domain::models::job::{JobStatus, JobType, SourceType};
use ingestrs::domain::models::work_task::QueueName;
use ingestrs::domain::repositories::storage_repository::{
    ObjectStore, BUCKET_PAGES, BUCKET_RESULTS, BUCKET_UPLOADS,
};
use ingestrs::infrastructure::converter::{StubConverter, StubFailure};
use ingestrs::utils::pdf::minimal_pdf;
use ingestrs::workers::conversion_worker::ConversionWorker;

use super::helpers::{
    conversion_settings, monitoring_settings, multi_page_pdf, worker_settings,
    ConversionProcessor, Harness,
};

async fn create_main(harness: &Harness, upload_key: &str, bytes: &[u8]) -> Uuid {
    harness
        .storage
        .put(BUCKET_UPLOADS, upload_key, bytes, "application/pdf")
        .await
        .unwrap();

    let use_case = CreateJobUseCase::new(harness.jobs(), harness.queue.clone());
    let main = use_case
        .execute(CreateJobRequest {
            user_id: Uuid::new_v4(),
            source_type: SourceType::File,
            source_url: None,
            name: upload_key.to_string(),
            upload_key: upload_key.to_string(),
        })
        .await
        .unwrap();
    main.id
}

#[tokio::test]
async fn test_single_page_pdf_conversion() {
    let harness = Harness::new();
    let converter = Arc::new(StubConverter::always("# Hello"));
    let worker = harness.conversion_worker(converter);

    let main_id = create_main(&harness, "hello.pdf", &minimal_pdf("Hello")).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let main = harness.jobs().find_by_id(main_id).await.unwrap().unwrap();
    assert_eq!(main.status, JobStatus::Completed);
    assert_eq!(main.total_pages, 1);
    assert_eq!(main.pages_completed, 1);
    assert_eq!(main.pages_failed, 0);
    assert_eq!(main.progress, 100);

    // 一个split、一个page、一个merge子作业，全部完成
    let children = harness.jobs().find_children(main_id).await.unwrap();
    for kind in [JobType::Split, JobType::Page, JobType::Merge] {
        let child = children
            .iter()
            .find(|j| j.job_type == kind)
            .unwrap_or_else(|| panic!("missing {} child", kind));
        assert_eq!(child.status, JobStatus::Completed, "{} not completed", kind);
    }

    let page = harness
        .pages()
        .find_page(main_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.status, JobStatus::Completed);
    assert!(page.markdown_content.as_deref().unwrap().contains("Hello"));

    let result = harness
        .storage
        .get(BUCKET_RESULTS, &format!("{}/result.md", main_id))
        .await
        .unwrap();
    assert!(String::from_utf8(result).unwrap().contains("Hello"));
}

#[tokio::test]
async fn test_multi_page_with_failure_then_retry() {
    let harness = Harness::new();
    // 第二页第一次失败，重试成功
    let converter = Arc::new(StubConverter::scripted(
        vec![
            Ok(StubConverter::output("# Page one")),
            Err(StubFailure::CorruptInput),
            Ok(StubConverter::output("# Page three")),
        ],
        "# Page two retried",
    ));
    let worker = harness.conversion_worker(converter);

    let main_id = create_main(&harness, "three.pdf", &multi_page_pdf(3)).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let main = harness.jobs().find_by_id(main_id).await.unwrap().unwrap();
    // 部分页面失败不让主作业失败
    assert_eq!(main.status, JobStatus::Completed);
    assert_eq!(main.total_pages, 3);
    assert_eq!(main.pages_completed, 2);
    assert_eq!(main.pages_failed, 1);
    assert!(main.pages_completed + main.pages_failed <= main.total_pages);

    // RetryPage：换新page作业并重投转换
    let failed_page = harness
        .pages()
        .find_page(main_id, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed_page.status, JobStatus::Failed);
    let old_page_job = failed_page.page_job_id.unwrap();

    let retry = RetryPageUseCase::new(harness.jobs(), harness.pages(), harness.queue.clone());
    let new_page_job = retry.execute(old_page_job).await.unwrap();
    assert_ne!(new_page_job, old_page_job);

    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let main = harness.jobs().find_by_id(main_id).await.unwrap().unwrap();
    assert_eq!(main.status, JobStatus::Completed);
    assert_eq!(main.pages_completed, 3);
    assert_eq!(main.pages_failed, 0);

    let page = harness
        .pages()
        .find_page(main_id, 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.status, JobStatus::Completed);
    assert_eq!(page.retry_count, 1);

    // 合并重跑后结果包含重试页内容
    let result = harness
        .storage
        .get(BUCKET_RESULTS, &format!("{}/result.md", main_id))
        .await
        .unwrap();
    let result = String::from_utf8(result).unwrap();
    assert!(result.contains("Page one"));
    assert!(result.contains("retried"));
    assert!(result.contains("Page three"));
}

#[tokio::test]
async fn test_corrupt_upload_fails_main_with_corrupt_input() {
    let harness = Harness::new();
    let worker = harness.conversion_worker(Arc::new(StubConverter::always("unused")));

    let main_id = create_main(&harness, "broken.pdf", b"this is not a pdf").await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let main = harness.jobs().find_by_id(main_id).await.unwrap().unwrap();
    assert_eq!(main.status, JobStatus::Failed);
    assert!(main.error.as_deref().unwrap().contains("corrupt_input"));
}

#[tokio::test]
async fn test_split_refuses_documents_over_page_limit() {
    let harness = Harness::new();

    let mut settings = conversion_settings();
    settings.max_pages_per_document = 2;
    let worker = ConversionWorker::new(
        harness.jobs(),
        harness.pages(),
        harness.queue.clone(),
        harness.storage.clone(),
        Arc::new(StubConverter::always("unused")),
        harness.writer.clone(),
        settings,
        worker_settings(),
    );

    // 上限2页成功，3页被拒绝
    let ok_id = create_main(&harness, "two.pdf", &multi_page_pdf(2)).await;
    let too_big_id = create_main(&harness, "three.pdf", &multi_page_pdf(3)).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let ok = harness.jobs().find_by_id(ok_id).await.unwrap().unwrap();
    assert_eq!(ok.status, JobStatus::Completed);

    let too_big = harness.jobs().find_by_id(too_big_id).await.unwrap().unwrap();
    assert_eq!(too_big.status, JobStatus::Failed);
    assert!(too_big.error.as_deref().unwrap().contains("exceeding"));
}

#[tokio::test]
async fn test_delete_main_leaves_no_owned_rows_or_blobs() {
    let harness = Harness::new();
    let worker = harness.conversion_worker(Arc::new(StubConverter::always("# md")));

    let main_id = create_main(&harness, "doc.pdf", &multi_page_pdf(2)).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let manage = ManageJobsUseCase::new(harness.jobs(), harness.storage.clone(), harness.scheduler());
    manage.delete_job(main_id).await.unwrap();

    assert!(harness.jobs().find_by_id(main_id).await.unwrap().is_none());
    assert!(harness
        .jobs()
        .find_children(main_id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness
        .pages()
        .get_pages(main_id, 100, 0)
        .await
        .unwrap()
        .is_empty());

    // 归属前缀列举为空
    let page_keys = harness
        .storage
        .list(BUCKET_PAGES, &format!("{}/", main_id))
        .await
        .unwrap();
    assert!(page_keys.is_empty());
    let result_keys = harness
        .storage
        .list(BUCKET_RESULTS, &format!("{}/", main_id))
        .await
        .unwrap();
    assert!(result_keys.is_empty());
}

#[tokio::test]
async fn test_cancel_terminal_job_is_noop_success() {
    let harness = Harness::new();
    let worker = harness.conversion_worker(Arc::new(StubConverter::always("# md")));

    let main_id = create_main(&harness, "doc.pdf", &minimal_pdf("x")).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let manage = ManageJobsUseCase::new(harness.jobs(), harness.storage.clone(), harness.scheduler());
    let job = manage.cancel_job(main_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_monitor_fails_stuck_jobs() {
    use chrono::{Duration, Utc};
    use ingestrs::domain::models::job::Job;
    use ingestrs::workers::monitor_worker::MonitorWorker;

    let harness = Harness::new();

    // processing超过阈值的作业被标记失败
    let mut stuck = Job::new_main(Uuid::new_v4(), SourceType::File, "stuck.pdf".to_string());
    stuck.start().unwrap();
    stuck.started_at = Some(Utc::now() - Duration::hours(2));
    harness.jobs().create(&stuck).await.unwrap();

    let mut fresh = Job::new_main(Uuid::new_v4(), SourceType::File, "fresh.pdf".to_string());
    fresh.start().unwrap();
    harness.jobs().create(&fresh).await.unwrap();

    let monitor = MonitorWorker::new(
        harness.jobs(),
        harness.tasks(),
        harness.writer.clone(),
        monitoring_settings(),
    );
    monitor.tick().await;

    let stuck = harness.jobs().find_by_id(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Failed);
    assert!(stuck.error.as_deref().unwrap().contains("stuck"));

    let fresh = harness.jobs().find_by_id(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_retry_page_rejects_invalid_states() {
    let harness = Harness::new();
    let worker = harness.conversion_worker(Arc::new(StubConverter::scripted(
        vec![Err(StubFailure::CorruptInput)],
        "# retried",
    )));

    let main_id = create_main(&harness, "one.pdf", &minimal_pdf("x")).await;
    harness
        .drain(QueueName::Conversion, ConversionProcessor(&worker))
        .await;

    let page = harness
        .pages()
        .find_page(main_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.status, JobStatus::Failed);
    let retry = RetryPageUseCase::new(harness.jobs(), harness.pages(), harness.queue.clone());

    // 耗尽重试
    let mut page_job_id = page.page_job_id.unwrap();
    for _ in 0..3 {
        page_job_id = retry.execute(page_job_id).await.unwrap();
        // 让新投递的页失败（stub脚本耗尽后回退成功——改为直接改页面行）
        let mut page = harness
            .pages()
            .find_page(main_id, 1)
            .await
            .unwrap()
            .unwrap();
        page.mark_failed("still broken");
        harness.pages().update_page(&page).await.unwrap();
    }

    // retry_count=3之后拒绝
    let err = retry.execute(page_job_id).await.unwrap_err();
    assert!(err.to_string().contains("exhausted"));

    // 成功页面拒绝重试
    let harness2 = Harness::new();
    let worker2 = harness2.conversion_worker(Arc::new(StubConverter::always("# ok")));
    let main2 = create_main(&harness2, "ok.pdf", &minimal_pdf("y")).await;
    harness2
        .drain(QueueName::Conversion, ConversionProcessor(&worker2))
        .await;
    let page2 = harness2
        .pages()
        .find_page(main2, 1)
        .await
        .unwrap()
        .unwrap();
    let retry2 = RetryPageUseCase::new(harness2.jobs(), harness2.pages(), harness2.queue.clone());
    let err = retry2.execute(page2.page_job_id.unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("only failed pages"));
}
