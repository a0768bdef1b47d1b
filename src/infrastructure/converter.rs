// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::services::converter::{
    ConversionMeta, ConversionOutput, ConverterError, DocumentConverter,
};

/// HTTP转换服务客户端
///
/// 把文档字节POST给转换服务，服务端返回markdown与元数据
pub struct HttpConverter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpConverter {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl DocumentConverter for HttpConverter {
    async fn convert(
        &self,
        bytes: &[u8],
        hint_format: Option<&str>,
    ) -> Result<ConversionOutput, ConverterError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec());

        if let Some(hint) = hint_format {
            request = request.query(&[("format", hint)]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ConverterError::Timeout(e.to_string())
            } else {
                ConverterError::Timeout(format!("converter unreachable: {}", e))
            }
        })?;

        match response.status().as_u16() {
            200 => response
                .json::<ConversionOutput>()
                .await
                .map_err(|e| ConverterError::CorruptInput(format!("bad converter reply: {}", e))),
            415 => Err(ConverterError::UnsupportedFormat(
                hint_format.unwrap_or("unknown").to_string(),
            )),
            422 => Err(ConverterError::CorruptInput(
                "converter rejected document".to_string(),
            )),
            408 | 504 => Err(ConverterError::Timeout("converter timed out".to_string())),
            other => Err(ConverterError::CorruptInput(format!(
                "converter returned HTTP {}",
                other
            ))),
        }
    }
}

/// 测试替身转换器
///
/// 按脚本逐次返回结果；用于流水线场景测试
pub struct StubConverter {
    responses: tokio::sync::Mutex<Vec<Result<ConversionOutput, StubFailure>>>,
    fallback_markdown: String,
}

/// 可克隆的失败脚本
#[derive(Debug, Clone)]
pub enum StubFailure {
    UnsupportedFormat,
    CorruptInput,
    Timeout,
}

impl StubConverter {
    /// 所有调用都返回同一markdown
    pub fn always(markdown: &str) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(Vec::new()),
            fallback_markdown: markdown.to_string(),
        }
    }

    /// 先按脚本返回，脚本耗尽后回退到固定markdown
    pub fn scripted(
        script: Vec<Result<ConversionOutput, StubFailure>>,
        fallback_markdown: &str,
    ) -> Self {
        let mut responses = script;
        responses.reverse();
        Self {
            responses: tokio::sync::Mutex::new(responses),
            fallback_markdown: fallback_markdown.to_string(),
        }
    }

    pub fn output(markdown: &str) -> ConversionOutput {
        ConversionOutput {
            markdown: markdown.to_string(),
            meta: ConversionMeta {
                pages: Some(1),
                words: markdown.split_whitespace().count() as u64,
                format: "pdf".to_string(),
                size_bytes: markdown.len() as u64,
                title: None,
                author: None,
            },
        }
    }
}

#[async_trait]
impl DocumentConverter for StubConverter {
    async fn convert(
        &self,
        _bytes: &[u8],
        _hint_format: Option<&str>,
    ) -> Result<ConversionOutput, ConverterError> {
        let next = self.responses.lock().await.pop();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(StubFailure::UnsupportedFormat)) => {
                Err(ConverterError::UnsupportedFormat("stub".to_string()))
            }
            Some(Err(StubFailure::CorruptInput)) => {
                Err(ConverterError::CorruptInput("stub".to_string()))
            }
            Some(Err(StubFailure::Timeout)) => Err(ConverterError::Timeout("stub".to_string())),
            None => Ok(Self::output(&self.fallback_markdown)),
        }
    }
}
