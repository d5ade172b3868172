//! 压缩请求与结果

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 压缩请求
///
/// 图片数据按不透明字节处理，不做解码和校验。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionRequest {
    /// 原始图片字节
    #[serde(skip)]
    pub data: Bytes,
    /// 目标宽度（像素）
    pub target_width: u32,
    /// 质量等级标签（good / eco / low）
    pub quality: String,
    /// 去重键（由调用方提供）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl CompressionRequest {
    pub fn new(data: Bytes, target_width: u32, quality: impl Into<String>) -> Self {
        Self {
            data,
            target_width,
            quality: quality.into(),
            dedupe_key: None,
        }
    }

    /// 设置去重键
    pub fn with_dedupe_key(mut self, key: Option<&str>) -> Self {
        self.dedupe_key = key.map(ToString::to_string);
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// 压缩结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    /// 压缩后的字节
    #[serde(skip)]
    pub data: Bytes,
    /// 处理方式描述，例如 `tinypng@800px`
    pub method: String,
    /// Provider ID
    pub provider: String,
    /// 实际使用的质量等级
    pub quality: String,
    /// 耗时（毫秒）
    pub latency_ms: u64,
    /// 原始大小（字节）
    pub original_size: u64,
    /// 输出大小（字节）
    pub output_size: u64,
}

impl CompressionResult {
    /// 节省的字节数，输出更大时为 0
    pub fn bytes_saved(&self) -> u64 {
        self.original_size.saturating_sub(self.output_size)
    }

    /// 压缩比（输出 / 原始）
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.output_size as f64 / self.original_size as f64
    }
}
