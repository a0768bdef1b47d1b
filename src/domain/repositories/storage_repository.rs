// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

/// 上传物桶
pub const BUCKET_UPLOADS: &str = "uploads";
/// 单页PDF桶
pub const BUCKET_PAGES: &str = "pages";
/// 结果桶
pub const BUCKET_RESULTS: &str = "results";
/// 爬取产物桶
pub const BUCKET_CRAWLED: &str = "crawled";

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// 对象存储接口
///
/// 每次执行的前缀只追加不改写；删除作业时按前缀级联清理
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 写入对象，返回etag
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// 读取对象
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// 生成限时公开访问URL
    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<String, StorageError>;

    /// 删除对象（不存在时为no-op）
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// 按前缀删除
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StorageError>;

    /// 按前缀列出key
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}
