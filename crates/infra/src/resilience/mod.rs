//! 弹性模块
//!
//! - `circuit_breaker` - 按 Provider 隔离的熔断器
//! - `retry` - 指数退避重试
//! - `timeout` - 单次网络操作超时

mod circuit_breaker;
mod retry;
mod timeout;

pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitSnapshot,
    CircuitState,
};
pub use retry::{Retrier, RetryConfig};
pub use timeout::{TimeoutConfig, TimeoutController};
