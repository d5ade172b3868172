//! 熔断器
//!
//! 每个 Provider 一个状态机：
//!
//! ```text
//! Closed   → Open:     连续失败次数达到 failure_threshold
//! Open     → HalfOpen: 距上次失败超过 reset_timeout 后的下一次查询（惰性）
//! HalfOpen → Closed:   连续 successes_to_close 次成功
//! HalfOpen → Open:     任意一次失败
//! ```
//!
//! 半开状态的试探名额在 `can_attempt` 检查时扣减，而不是在调用完成时。
//! 没有产出结果就被放弃的试探必须调用 `release_trial` 归还名额。
//! 所有状态变更都在同一把锁内完成，并发检查不会超发名额。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use squashcast_core::CircuitBreakerSettings;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 熔断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{name}")
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_max_attempts: u32,
    pub successes_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            half_open_max_attempts: settings.half_open_max_attempts,
            successes_to_close: settings.successes_to_close,
        }
    }
}

/// 单个 Provider 的熔断状态
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    /// 连续失败次数
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    /// 半开状态下已发放的试探次数
    pub half_open_attempts: u32,
    /// 半开状态下的连续成功次数
    pub success_count: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_attempts: 0,
            success_count: 0,
        }
    }
}

/// 对外暴露的只读快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
}

/// 熔断器注册表
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitBreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 预先登记 Provider，使其出现在快照中
    pub fn register(&self, provider: &str) {
        self.circuits
            .lock()
            .entry(provider.to_string())
            .or_default();
    }

    /// 是否允许发起一次调用
    pub fn can_attempt(&self, provider: &str) -> bool {
        self.try_acquire(provider).is_some()
    }

    /// 申请一次调用，返回放行时所处的状态
    ///
    /// 返回 `HalfOpen` 表示占用了一个试探名额。
    pub fn try_acquire(&self, provider: &str) -> Option<CircuitState> {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(provider.to_string()).or_default();
        self.refresh(provider, entry);

        match entry.state {
            CircuitState::Closed => Some(CircuitState::Closed),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if entry.half_open_attempts < self.config.half_open_max_attempts {
                    entry.half_open_attempts += 1;
                    tracing::debug!(
                        "[CIRCUIT] provider={} 半开试探 {}/{}",
                        provider,
                        entry.half_open_attempts,
                        self.config.half_open_max_attempts
                    );
                    Some(CircuitState::HalfOpen)
                } else {
                    None
                }
            }
        }
    }

    /// 归还一个未产出结果的试探名额（调用被取消）
    ///
    /// 仅在仍处于半开状态时生效，其他状态下名额已随状态转换重置。
    pub fn release_trial(&self, provider: &str) {
        let mut circuits = self.circuits.lock();
        let Some(entry) = circuits.get_mut(provider) else {
            return;
        };
        if entry.state == CircuitState::HalfOpen && entry.half_open_attempts > 0 {
            entry.half_open_attempts -= 1;
            tracing::debug!("[CIRCUIT] provider={} 试探被取消，归还名额", provider);
        }
    }

    /// 记录一次成功
    pub fn record_success(&self, provider: &str) {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(provider.to_string()).or_default();
        self.refresh(provider, entry);

        match entry.state {
            CircuitState::Closed => {
                entry.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                entry.failure_count = 0;
                entry.success_count += 1;
                if entry.success_count >= self.config.successes_to_close {
                    *entry = CircuitBreakerState::default();
                    tracing::info!("[CIRCUIT] provider={} 已恢复: half-open → closed", provider);
                } else {
                    // 试探成功但尚未关闭，归还名额供下一次试探
                    entry.half_open_attempts = entry.half_open_attempts.saturating_sub(1);
                }
            }
            // 熔断期间迟到的成功不改变状态
            CircuitState::Open => {}
        }
    }

    /// 记录一次失败
    pub fn record_failure(&self, provider: &str) {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(provider.to_string()).or_default();
        self.refresh(provider, entry);

        entry.failure_count += 1;
        entry.last_failure = Some(Instant::now());

        match entry.state {
            CircuitState::Closed => {
                if entry.failure_count >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    tracing::warn!(
                        "[CIRCUIT] provider={} 连续失败 {} 次: closed → open",
                        provider,
                        entry.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.success_count = 0;
                entry.half_open_attempts = 0;
                tracing::warn!("[CIRCUIT] provider={} 试探失败: half-open → open", provider);
            }
            CircuitState::Open => {}
        }
    }

    /// 查询当前状态（会触发惰性的 open → half-open 转换）
    pub fn state(&self, provider: &str) -> CircuitState {
        let mut circuits = self.circuits.lock();
        let entry = circuits.entry(provider.to_string()).or_default();
        self.refresh(provider, entry);
        entry.state
    }

    /// 完整状态副本
    pub fn detail(&self, provider: &str) -> Option<CircuitBreakerState> {
        let mut circuits = self.circuits.lock();
        let entry = circuits.get_mut(provider)?;
        self.refresh(provider, entry);
        Some(entry.clone())
    }

    /// 所有已知 Provider 的快照
    pub fn snapshot(&self) -> HashMap<String, CircuitSnapshot> {
        let mut circuits = self.circuits.lock();
        circuits
            .iter_mut()
            .map(|(provider, entry)| {
                self.refresh(provider, entry);
                (
                    provider.clone(),
                    CircuitSnapshot {
                        state: entry.state,
                        failure_count: entry.failure_count,
                    },
                )
            })
            .collect()
    }

    fn refresh(&self, provider: &str, entry: &mut CircuitBreakerState) {
        if entry.state != CircuitState::Open {
            return;
        }
        let elapsed = entry
            .last_failure
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            entry.state = CircuitState::HalfOpen;
            entry.half_open_attempts = 0;
            entry.success_count = 0;
            tracing::info!("[CIRCUIT] provider={} 冷却结束: open → half-open", provider);
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
