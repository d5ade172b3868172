//! 指数退避重试
//!
//! 重试只发生在同一个 Provider 内部，不会跨 Provider。

use squashcast_core::{ProviderError, RetrySettings};
use std::future::Future;
use std::time::Duration;

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryConfig {
    /// 第 `retry_index` 次重试前的等待时间（从 0 开始）
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 重试执行器
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行操作，失败且可重试时按退避间隔重试
    ///
    /// 返回最后一次的错误。配额和未配置错误不重试。
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        "[RETRY] provider={} attempt={}/{} kind={} error={} retryable={}",
                        label,
                        attempts,
                        max_attempts,
                        err.kind(),
                        err,
                        err.is_retryable()
                    );
                    if !err.is_retryable() || attempts >= max_attempts {
                        return Err(err);
                    }
                    let delay = self.config.backoff_delay(attempts - 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
