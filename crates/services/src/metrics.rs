//! 运行指标
//!
//! 编排器生命周期内的累计计数。每次调用结束时同步更新，
//! 锁不跨越 await。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// 新样本在延迟均值中的权重
const LATENCY_WEIGHT: f64 = 0.1;

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    bytes_processed: u64,
    bytes_saved: u64,
    avg_latency_ms: f64,
    provider_successes: HashMap<String, u64>,
    deduplicated_requests: u64,
}

impl MetricsState {
    fn observe_latency(&mut self, latency_ms: u64) {
        self.avg_latency_ms =
            LATENCY_WEIGHT * latency_ms as f64 + (1.0 - LATENCY_WEIGHT) * self.avg_latency_ms;
    }
}

/// 指标快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// 成功率（0-1），没有请求时为 0
    pub success_rate: f64,
    pub bytes_processed: u64,
    pub bytes_saved: u64,
    /// 指数加权平均延迟
    pub avg_latency_ms: f64,
    pub provider_successes: HashMap<String, u64>,
    /// 复用进行中请求的调用次数（不计入 total）
    pub deduplicated_requests: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// 指标收集器
pub struct MetricsCollector {
    started: Instant,
    started_at: DateTime<Utc>,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// 记录一次成功的压缩
    pub fn record_success(
        &self,
        provider: &str,
        input_bytes: u64,
        output_bytes: u64,
        latency_ms: u64,
    ) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.successful_requests += 1;
        state.bytes_processed += input_bytes;
        state.bytes_saved += input_bytes.saturating_sub(output_bytes);
        state.observe_latency(latency_ms);
        *state
            .provider_successes
            .entry(provider.to_string())
            .or_insert(0) += 1;
    }

    /// 记录一次失败的压缩
    pub fn record_failure(&self, input_bytes: u64, latency_ms: u64) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.failed_requests += 1;
        state.bytes_processed += input_bytes;
        state.observe_latency(latency_ms);
    }

    pub fn record_deduplicated(&self) {
        self.state.lock().deduplicated_requests += 1;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let success_rate = if state.total_requests == 0 {
            0.0
        } else {
            state.successful_requests as f64 / state.total_requests as f64
        };
        MetricsSnapshot {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            success_rate,
            bytes_processed: state.bytes_processed,
            bytes_saved: state.bytes_saved,
            avg_latency_ms: state.avg_latency_ms,
            provider_successes: state.provider_successes.clone(),
            deduplicated_requests: state.deduplicated_requests,
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
