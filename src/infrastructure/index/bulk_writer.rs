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

use metrics::counter;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::domain::repositories::progress_index::{IndexDocument, IndexStream, ProgressIndexer};

/// 批量索引写入器
///
/// 缓冲100条或5秒先到先flush；缓冲有界，溢出丢最旧并计数；
/// flush失败只记录日志，文档退回缓冲等待下次flush——
/// 索引写入永不让作业失败，也永不阻塞worker
pub struct BulkIndexWriter {
    inner: Arc<dyn ProgressIndexer>,
    buffer: Mutex<VecDeque<IndexDocument>>,
    notify: Notify,
    flush_max_docs: usize,
    capacity: usize,
}

impl BulkIndexWriter {
    /// 创建写入器并启动后台flush任务
    pub fn spawn(
        inner: Arc<dyn ProgressIndexer>,
        flush_max_docs: usize,
        flush_interval: Duration,
        capacity: usize,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let writer = Arc::new(Self {
            inner,
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            flush_max_docs: flush_max_docs.max(1),
            capacity: capacity.max(1),
        });

        let background = writer.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = background.notify.notified() => {}
                }
                background.flush().await;
            }
        });

        (writer, handle)
    }

    /// 入缓冲；达到批量阈值时唤醒flush
    pub async fn enqueue(&self, stream: IndexStream, body: Value) {
        let mut buffer = self.buffer.lock().await;

        if buffer.len() >= self.capacity {
            buffer.pop_front();
            counter!("indexer_dropped_documents").increment(1);
        }
        buffer.push_back(IndexDocument { stream, body });

        if buffer.len() >= self.flush_max_docs {
            drop(buffer);
            self.notify.notify_one();
        }
    }

    /// 立即flush当前缓冲（终态转换时调用）
    pub async fn flush(&self) {
        let batch: Vec<IndexDocument> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };

        if batch.is_empty() {
            return;
        }

        if let Err(e) = self.inner.bulk_index(&batch).await {
            warn!("progress index flush failed ({} docs): {}", batch.len(), e);
            counter!("indexer_flush_failures").increment(1);

            // 退回缓冲，保持顺序，下次flush重试
            let mut buffer = self.buffer.lock().await;
            for doc in batch.into_iter().rev() {
                buffer.push_front(doc);
            }
            while buffer.len() > self.capacity {
                buffer.pop_front();
                counter!("indexer_dropped_documents").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::index::memory::InMemoryIndexer;
    use serde_json::json;

    #[tokio::test]
    async fn test_flush_delivers_buffered_documents() {
        let sink = Arc::new(InMemoryIndexer::new());
        let (writer, handle) = BulkIndexWriter::spawn(
            sink.clone(),
            100,
            Duration::from_secs(3600),
            1000,
        );

        writer
            .enqueue(IndexStream::ExecutionMetrics, json!({"progress": 40}))
            .await;
        writer
            .enqueue(IndexStream::RetryMetrics, json!({"attempt": 0}))
            .await;
        writer.flush().await;

        assert_eq!(sink.len().await, 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let sink = Arc::new(InMemoryIndexer::new());
        let (writer, handle) =
            BulkIndexWriter::spawn(sink.clone(), 1000, Duration::from_secs(3600), 3);

        for i in 0..5 {
            writer
                .enqueue(IndexStream::ExecutionMetrics, json!({"sample": i}))
                .await;
        }
        writer.flush().await;

        let docs = sink.stream_documents(IndexStream::ExecutionMetrics).await;
        assert_eq!(docs.len(), 3);
        // 留下的是最新的三条
        assert_eq!(docs[0]["sample"], 2);
        assert_eq!(docs[2]["sample"], 4);
        handle.abort();
    }
}
