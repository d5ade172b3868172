//! Provider 健康状态与配额

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
    Unconfigured,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Error => "error",
            HealthStatus::Unconfigured => "unconfigured",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider 健康检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub status: HealthStatus,
    /// 健康评分 (0-100)
    pub score: u8,
    pub latency_ms: u64,
    pub message: String,
    pub configured: bool,
    pub last_checked: DateTime<Utc>,
}

impl ProviderHealth {
    /// 未配置凭证的 Provider
    pub fn unconfigured(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            status: HealthStatus::Unconfigured,
            score: 0,
            latency_ms: 0,
            message: "未配置凭证".to_string(),
            configured: false,
            last_checked: Utc::now(),
        }
    }

    /// 根据探测结果构建，评分由状态和延迟推导
    pub fn probed(
        provider: &str,
        status: HealthStatus,
        latency_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            status,
            score: health_score(status, latency_ms),
            latency_ms,
            message: message.into(),
            configured: true,
            last_checked: Utc::now(),
        }
    }
}

/// 计算健康评分
///
/// ok 从 100 起按每 100ms 扣 1 分，最多扣 30 分；degraded 固定 50。
pub fn health_score(status: HealthStatus, latency_ms: u64) -> u8 {
    match status {
        HealthStatus::Ok => 100 - (latency_ms / 100).min(30) as u8,
        HealthStatus::Degraded => 50,
        HealthStatus::Error | HealthStatus::Unconfigured => 0,
    }
}

/// Provider 配额
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderQuota {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub percent_used: f64,
    pub exhausted: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ProviderQuota {
    pub fn new(used: u64, limit: u64) -> Self {
        let percent_used = if limit == 0 {
            0.0
        } else {
            (used as f64 / limit as f64 * 100.0).min(100.0)
        };
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            percent_used,
            exhausted: limit > 0 && used >= limit,
            last_checked: Some(Utc::now()),
        }
    }

    /// 尚未查询过的配额
    pub fn unknown(limit: u64) -> Self {
        Self {
            used: 0,
            limit,
            remaining: limit,
            percent_used: 0.0,
            exhausted: false,
            last_checked: None,
        }
    }

    /// 标记为已耗尽（上游返回配额错误时）
    pub fn mark_exhausted(&mut self) {
        self.used = self.used.max(self.limit);
        self.remaining = 0;
        self.percent_used = 100.0;
        self.exhausted = true;
        self.last_checked = Some(Utc::now());
    }
}
