// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::config::settings::StorageSettings;
use crate::domain::repositories::storage_repository::{ObjectStore, StorageError};

/// 本地文件系统对象存储
///
/// bucket为基路径下的子目录；presigned链接直接拼公开基址
pub struct LocalStorage {
    base_path: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: String) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        _ttl_seconds: u64,
    ) -> Result<String, StorageError> {
        Ok(format!("{}/{}/{}", self.public_base_url, bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StorageError> {
        let keys = self.list(bucket, prefix).await?;
        let count = keys.len() as u64;
        for key in keys {
            self.delete(bucket, &key).await?;
        }
        Ok(count)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let bucket_path = self.base_path.join(bucket);
        if !bucket_path.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut stack = vec![bucket_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&bucket_path) {
                    let key = relative.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// 测试用的内存对象存储
#[derive(Default)]
pub struct InMemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(bucket: &str, key: &str) -> String {
        format!("{}/{}", bucket, key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let mut objects = self.objects.write().await;
        objects.insert(Self::full_key(bucket, key), bytes.to_vec());

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.read().await;
        objects
            .get(&Self::full_key(bucket, key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        _ttl_seconds: u64,
    ) -> Result<String, StorageError> {
        // 内存实现也给出可解析的URL形状
        Ok(format!("memory://{}/{}", bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        objects.remove(&Self::full_key(bucket, key));
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StorageError> {
        let mut objects = self.objects.write().await;
        let full_prefix = Self::full_key(bucket, prefix);
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(&full_prefix));
        Ok((before - objects.len()) as u64)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read().await;
        let bucket_prefix = format!("{}/", bucket);
        let mut keys: Vec<String> = objects
            .keys()
            .filter_map(|k| k.strip_prefix(&bucket_prefix))
            .filter(|k| k.starts_with(prefix))
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// 存储工厂函数
pub fn create_object_store(settings: &StorageSettings) -> Arc<dyn ObjectStore> {
    match settings.storage_type.as_str() {
        "memory" => Arc::new(InMemoryStorage::new()),
        _ => {
            let base = settings
                .local_path
                .clone()
                .unwrap_or_else(|| "./storage".to_string());
            Arc::new(LocalStorage::new(base, settings.public_base_url.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::storage_repository::BUCKET_CRAWLED;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = InMemoryStorage::new();
        store
            .put(BUCKET_CRAWLED, "exec/files/a.pdf", b"data", "application/pdf")
            .await
            .unwrap();

        assert_eq!(store.get(BUCKET_CRAWLED, "exec/files/a.pdf").await.unwrap(), b"data");
        assert!(store.get(BUCKET_CRAWLED, "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_delete_prefix() {
        let store = InMemoryStorage::new();
        for key in ["exec1/files/a.pdf", "exec1/pages/p.html", "exec2/files/b.pdf"] {
            store.put(BUCKET_CRAWLED, key, b"x", "text/plain").await.unwrap();
        }

        let deleted = store.delete_prefix(BUCKET_CRAWLED, "exec1/").await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.list(BUCKET_CRAWLED, "").await.unwrap();
        assert_eq!(remaining, vec!["exec2/files/b.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path(), "http://localhost:9000".to_string());

        store
            .put("results", "job/result.md", b"# md", "text/markdown")
            .await
            .unwrap();
        assert_eq!(store.get("results", "job/result.md").await.unwrap(), b"# md");

        let keys = store.list("results", "job/").await.unwrap();
        assert_eq!(keys, vec!["job/result.md".to_string()]);

        let url = store.presigned_get("results", "job/result.md", 600).await.unwrap();
        assert_eq!(url, "http://localhost:9000/results/job/result.md");

        store.delete("results", "job/result.md").await.unwrap();
        assert!(store.get("results", "job/result.md").await.is_err());
    }
}
