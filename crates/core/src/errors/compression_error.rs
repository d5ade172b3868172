//! 编排器对外错误
//!
//! 调用方需要据此决定重试、降级（保存原图）还是告警。

use super::provider_error::ProviderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单个 Provider 的失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 超时或网络类故障，稍后重试可能成功
    Transient,
    /// 没有配置 Provider 或全部熔断
    Structural,
    /// 所有 Provider 配额耗尽
    Exhausted,
    /// 上游拒绝了输入
    Rejected,
}

/// 压缩错误
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompressionError {
    #[error("所有 Provider 均失败: {}", format_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("没有可用的 Provider: {0}")]
    NoProviderAvailable(String),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CompressionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoProviderAvailable(_) => ErrorCategory::Structural,
            Self::AllProvidersFailed { failures } => {
                if failures.is_empty() {
                    ErrorCategory::Structural
                } else if failures.iter().all(|f| f.error.is_quota()) {
                    ErrorCategory::Exhausted
                } else if failures.iter().any(|f| f.error.is_transient()) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Rejected
                }
            }
        }
    }

    /// 调用方稍后重试是否有意义
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// 各 Provider 的失败原因（无可用 Provider 时为空）
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            Self::AllProvidersFailed { failures } => failures,
            Self::NoProviderAvailable(_) => &[],
        }
    }
}
