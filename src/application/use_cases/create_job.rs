// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use tracing::info;

use crate::application::dto::requests::CreateJobRequest;
use crate::domain::models::job::{Job, JobType, SourceType};
use crate::domain::models::work_task::{SplitPdfPayload, TaskKind, WorkTask};
use crate::domain::repositories::job_repository::JobRepository;
use crate::domain::services::url_normalizer;
use crate::queue::task_queue::TaskQueue;
use crate::utils::errors::CoreError;

/// 创建文档转换作业
///
/// 建立 main + split 作业并投递split_pdf任务；
/// 页数校验在split步骤进行（需要读文件）
pub struct CreateJobUseCase {
    jobs: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
}

impl CreateJobUseCase {
    pub fn new(jobs: Arc<dyn JobRepository>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { jobs, queue }
    }

    pub async fn execute(&self, request: CreateJobRequest) -> Result<Job, CoreError> {
        if request.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("job name is empty".to_string()));
        }
        if request.upload_key.trim().is_empty() {
            return Err(CoreError::InvalidInput("upload key is empty".to_string()));
        }

        let mut main = Job::new_main(request.user_id, request.source_type, request.name.clone());
        main.storage_upload_path = Some(request.upload_key.clone());

        if let Some(source_url) = &request.source_url {
            if request.source_type == SourceType::File {
                return Err(CoreError::InvalidInput(
                    "file jobs do not take a source url".to_string(),
                ));
            }
            let normalized = url_normalizer::normalize(source_url)
                .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
            let pattern = url_normalizer::pattern(source_url)
                .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
            main.source_url = Some(normalized);
            main.url_pattern = Some(pattern);
        }

        self.jobs
            .create(&main)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let split = Job::new_child(&main, JobType::Split, format!("{} - split", main.name));
        self.jobs
            .create(&split)
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let payload = SplitPdfPayload {
            main_job_id: main.id,
            split_job_id: split.id,
        };
        self.queue
            .enqueue(WorkTask::new(
                TaskKind::SplitPdf,
                serde_json::to_value(&payload)
                    .map_err(|e| CoreError::InvalidInput(e.to_string()))?,
            ))
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        info!("created main job {} with split {}", main.id, split.id);
        Ok(main)
    }
}
