//! 超时控制
//!
//! 每次网络操作都与计时器竞速，超时即视为该次尝试失败。

use squashcast_core::{OrchestratorConfig, ProviderError};
use std::future::Future;
use std::time::Duration;

/// 超时配置
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// 上传 / 转换调用
    pub transform: Duration,
    /// 下载结果
    pub download: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transform: Duration::from_secs(30),
            download: Duration::from_secs(20),
        }
    }
}

impl From<&OrchestratorConfig> for TimeoutConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            transform: config.transform_timeout(),
            download: config.download_timeout(),
        }
    }
}

/// 超时控制器
#[derive(Debug, Clone, Default)]
pub struct TimeoutController {
    config: TimeoutConfig,
}

impl TimeoutController {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// 转换类调用
    pub async fn transform<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        Self::run(operation, self.config.transform, fut).await
    }

    /// 下载类调用
    pub async fn download<T, Fut>(&self, operation: &str, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        Self::run(operation, self.config.download, fut).await
    }

    pub async fn run<T, Fut>(operation: &str, limit: Duration, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "[TIMEOUT] operation={} timeout_ms={}",
                    operation,
                    limit.as_millis()
                );
                Err(ProviderError::timeout(operation, limit.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified() {
        let controller = TimeoutController::new(TimeoutConfig {
            transform: Duration::from_millis(100),
            download: Duration::from_millis(50),
        });

        let result: Result<(), _> = controller
            .download("download", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(ProviderError::timeout("download", 50)));
    }

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let controller = TimeoutController::default();
        let result = controller.transform("upload", async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_from_orchestrator_config() {
        let mut config = OrchestratorConfig::default();
        config.download_timeout_ms = 5_000;
        let timeouts = TimeoutConfig::from(&config);
        assert_eq!(timeouts.transform, Duration::from_secs(30));
        assert_eq!(timeouts.download, Duration::from_secs(5));
    }
}
