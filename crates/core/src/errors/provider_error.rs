//! Provider 调用错误
//!
//! 每个 Provider 失败时都必须归入以下分类之一，供重试和熔断使用。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider 错误
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("Provider 未配置凭证")]
    NotConfigured,

    #[error("{operation} 超时 ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("配额已耗尽: {0}")]
    Quota(String),

    #[error("上游服务错误 ({}): {message}", format_status(.status))]
    Service {
        status: Option<u16>,
        message: String,
    },

    #[error("网络错误: {0}")]
    Network(String),
}

fn format_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "-".to_string(), |code| code.to_string())
}

impl ProviderError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn service(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    /// 是否值得在同一 Provider 内重试
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotConfigured | Self::Quota(_))
    }

    /// 是否属于瞬时故障（超时、网络、上游 5xx）
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network(_) => true,
            Self::Service { status, .. } => status.is_none_or(|code| code >= 500),
            Self::NotConfigured | Self::Quota(_) => false,
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    /// 错误分类名称（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Timeout { .. } => "timeout",
            Self::Quota(_) => "quota",
            Self::Service { .. } => "service",
            Self::Network(_) => "network",
        }
    }
}
