// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 转换错误类型
///
/// unsupported_format / corrupt_input 为致命错误，timeout 可重试
#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt input: {0}")]
    CorruptInput(String),

    #[error("conversion timeout: {0}")]
    Timeout(String),
}

impl ConverterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConverterError::Timeout(_))
    }
}

/// 转换结果元数据
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversionMeta {
    pub pages: Option<u32>,
    pub words: u64,
    pub format: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// 转换结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub markdown: String,
    pub meta: ConversionMeta,
}

/// 文档转换端口
///
/// 对同一输入结果确定；实现方负责格式探测
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(
        &self,
        bytes: &[u8],
        hint_format: Option<&str>,
    ) -> Result<ConversionOutput, ConverterError>;
}
