//! 基础设施层
//!
//! 提供熔断、重试、超时控制和并发请求去重等弹性能力，
//! 与具体的压缩 Provider 无关。

pub mod inflight;
pub mod resilience;

pub use inflight::{InflightAborted, InflightRegistry};
pub use resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitSnapshot,
    CircuitState, Retrier, RetryConfig, TimeoutConfig, TimeoutController,
};
