// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::settings::IndexerSettings;
use crate::domain::repositories::progress_index::{
    IndexDocument, IndexError, IndexStream, ProgressIndexer,
};

/// Elasticsearch进度索引
///
/// 指标流按日滚动索引（7天后可整索引删除），
/// 事件流单索引长保留
pub struct ElasticIndexer {
    client: reqwest::Client,
    base_url: String,
}

impl ElasticIndexer {
    pub fn new(settings: &IndexerSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: settings.elastic_url.trim_end_matches('/').to_string(),
        }
    }

    /// 文档所属的物理索引名
    fn index_name(stream: IndexStream) -> String {
        match stream {
            IndexStream::JobEvents => "job-events".to_string(),
            IndexStream::ExecutionMetrics => {
                format!("execution-metrics-{}", Utc::now().format("%Y.%m.%d"))
            }
            IndexStream::RetryMetrics => {
                format!("retry-metrics-{}", Utc::now().format("%Y.%m.%d"))
            }
        }
    }
}

#[async_trait]
impl ProgressIndexer for ElasticIndexer {
    async fn bulk_index(&self, documents: &[IndexDocument]) -> Result<(), IndexError> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for doc in documents {
            let action = serde_json::json!({ "index": { "_index": Self::index_name(doc.stream) } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.body.to_string());
            body.push('\n');
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexError::WriteFailed(format!(
                "bulk returned HTTP {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexError::WriteFailed(e.to_string()))?;
        if parsed.get("errors").and_then(|v| v.as_bool()) == Some(true) {
            return Err(IndexError::WriteFailed(
                "bulk response reported item errors".to_string(),
            ));
        }

        Ok(())
    }
}
