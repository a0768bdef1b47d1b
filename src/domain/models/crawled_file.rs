// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::errors::truncate_error;

/// 爬取文件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Pending,
    Downloaded,
    Failed,
    Skipped,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Downloaded => write!(f, "downloaded"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "downloaded" => Ok(FileStatus::Downloaded),
            "failed" => Ok(FileStatus::Failed),
            "skipped" => Ok(FileStatus::Skipped),
            _ => Err(()),
        }
    }
}

/// 爬取文件实体
///
/// 一次爬虫执行中下载的单个文件；execution_id 指向执行作业，
/// 删除执行时级联删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledFile {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub url: String,
    pub filename: String,
    /// 扩展名分类，如 pdf / jpg / css
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    /// 对象存储路径，status=downloaded 时必填
    pub storage_path: Option<String>,
    pub public_url: Option<String>,
    pub status: FileStatus,
    pub error: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CrawledFile {
    pub fn new(execution_id: Uuid, url: String, filename: String) -> Self {
        let file_type = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase());
        Self {
            id: Uuid::new_v4(),
            execution_id,
            url,
            filename,
            file_type,
            mime_type: None,
            size_bytes: 0,
            storage_path: None,
            public_url: None,
            status: FileStatus::Pending,
            error: None,
            downloaded_at: None,
            created_at: Utc::now(),
        }
    }

    /// 标记下载成功
    pub fn mark_downloaded(
        &mut self,
        storage_path: String,
        public_url: String,
        size_bytes: i64,
        mime_type: Option<String>,
    ) {
        self.status = FileStatus::Downloaded;
        self.storage_path = Some(storage_path);
        self.public_url = Some(public_url);
        self.size_bytes = size_bytes;
        self.mime_type = mime_type;
        self.downloaded_at = Some(Utc::now());
        self.error = None;
    }

    /// 标记下载失败
    pub fn mark_failed(&mut self, message: &str) {
        self.status = FileStatus::Failed;
        self.error = Some(truncate_error(message));
        self.downloaded_at = Some(Utc::now());
    }

    /// 标记跳过（重复、超限等）
    pub fn mark_skipped(&mut self, reason: &str) {
        self.status = FileStatus::Skipped;
        self.error = Some(format!("Skipped: {}", reason));
    }

    pub fn is_pdf(&self) -> bool {
        self.file_type.as_deref() == Some("pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_filename() {
        let file = CrawledFile::new(
            Uuid::new_v4(),
            "https://example.com/doc/Report.PDF".to_string(),
            "Report.PDF".to_string(),
        );
        assert_eq!(file.file_type.as_deref(), Some("pdf"));
        assert!(file.is_pdf());
    }

    #[test]
    fn test_mark_downloaded_populates_storage_fields() {
        let mut file = CrawledFile::new(
            Uuid::new_v4(),
            "https://example.com/a.pdf".to_string(),
            "a.pdf".to_string(),
        );
        file.mark_downloaded(
            "crawled/exec/files/a.pdf".to_string(),
            "http://store/crawled/exec/files/a.pdf".to_string(),
            1024,
            Some("application/pdf".to_string()),
        );

        assert_eq!(file.status, FileStatus::Downloaded);
        assert!(file.storage_path.is_some());
        assert!(file.public_url.is_some());
        assert_eq!(file.size_bytes, 1024);
        assert!(file.downloaded_at.is_some());
    }

    #[test]
    fn test_mark_failed_records_error() {
        let mut file = CrawledFile::new(
            Uuid::new_v4(),
            "https://example.com/a.pdf".to_string(),
            "a.pdf".to_string(),
        );
        file.mark_failed("HTTP 404");
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.error.as_deref(), Some("HTTP 404"));
    }
}
