//! 压缩编排服务
//!
//! 对外只暴露一个 `compress` 入口，内部依次完成：
//! 去重 → 按大小选择质量等级 → 筛选可用 Provider → 并发竞速（各自重试）→ 记录熔断与指标。
//!
//! 竞速中第一个成功的结果胜出，与 Provider 优先级无关；优先级只决定哪些 Provider 参与。
//! 未胜出的尝试默认继续执行到结束，只为记录各自的熔断结果。
//! 去重后的操作在独立任务中执行，调用方提前放弃等待不影响熔断、指标和登记项的收尾。

use crate::metrics::{MetricsCollector, MetricsSnapshot};
use bytes::Bytes;
use futures::future::join_all;
use squashcast_core::{
    CompressionError, CompressionRequest, CompressionResult, OrchestratorConfig, ProviderError,
    ProviderFailure, ProviderHealth, ProviderQuota,
};
use squashcast_infra::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
    InflightRegistry, Retrier, RetryConfig,
};
use squashcast_providers::{build_providers, SharedProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type CompressionOutcome = Result<CompressionResult, CompressionError>;
type AttemptReport = (String, Result<CompressionResult, ProviderError>);

/// 竞速中单个尝试的收尾
///
/// 正常结束时由 `settle` 记录熔断结果并上报。未经 `settle` 就被丢弃时：
/// panic 记为一次失败并上报，取消则归还占用的半开试探名额。
struct AttemptGuard {
    provider: String,
    circuits: Arc<CircuitBreakerRegistry>,
    admitted: CircuitState,
    reporter: Option<mpsc::UnboundedSender<AttemptReport>>,
}

impl AttemptGuard {
    fn settle(mut self, outcome: Result<CompressionResult, ProviderError>) {
        match &outcome {
            Ok(_) => self.circuits.record_success(&self.provider),
            Err(_) => self.circuits.record_failure(&self.provider),
        }
        if let Some(reporter) = self.reporter.take() {
            // 竞速已结束时接收端可能已关闭，结果直接丢弃
            let _ = reporter.send((self.provider.clone(), outcome));
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let Some(reporter) = self.reporter.take() else {
            return;
        };
        if std::thread::panicking() {
            tracing::error!("[COMPRESS] provider={} 尝试异常终止", self.provider);
            self.circuits.record_failure(&self.provider);
            let _ = reporter.send((
                self.provider.clone(),
                Err(ProviderError::service(None, "压缩尝试异常终止")),
            ));
        } else if self.admitted == CircuitState::HalfOpen {
            self.circuits.release_trial(&self.provider);
        }
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    providers: Vec<SharedProvider>,
    circuits: Arc<CircuitBreakerRegistry>,
    retrier: Retrier,
    inflight: InflightRegistry<CompressionOutcome>,
    metrics: MetricsCollector,
}

/// 压缩编排器
///
/// 熔断表、进行中请求表和指标都归单个实例所有。克隆共享同一份状态。
#[derive(Clone)]
pub struct CompressionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl CompressionOrchestrator {
    /// 按配置发现 Provider
    pub fn new(config: OrchestratorConfig) -> Self {
        let providers = build_providers(&config);
        Self::with_providers(config, providers)
    }

    /// 使用指定的 Provider 列表（顺序即优先级）
    pub fn with_providers(config: OrchestratorConfig, providers: Vec<SharedProvider>) -> Self {
        let circuits = CircuitBreakerRegistry::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        ));
        for provider in &providers {
            circuits.register(provider.id());
        }
        let retrier = Retrier::new(RetryConfig::from(&config.retry));

        tracing::info!(
            "[COMPRESS] 编排器已创建, providers={}, configured={}",
            providers.len(),
            providers.iter().filter(|p| p.is_configured()).count()
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                providers,
                circuits: Arc::new(circuits),
                retrier,
                inflight: InflightRegistry::new(),
                metrics: MetricsCollector::new(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// 压缩图片
    ///
    /// 带去重键时，同键的并发调用共享一次底层操作和同一个结果。
    pub async fn compress(
        &self,
        data: Bytes,
        dedupe_key: Option<&str>,
    ) -> Result<CompressionResult, CompressionError> {
        let key = dedupe_key.map(str::trim).filter(|key| !key.is_empty());
        let Some(key) = key else {
            return self.execute(data, None).await;
        };

        let this = self.clone();
        let owned_key = key.to_string();
        let (outcome, joined) = self
            .inner
            .inflight
            .run(key, move || async move { this.execute(data, Some(owned_key)).await })
            .await;
        if joined {
            self.inner.metrics.record_deduplicated();
        }
        outcome.unwrap_or_else(|aborted| {
            tracing::error!("[COMPRESS] {}", aborted);
            Err(CompressionError::AllProvidersFailed {
                failures: Vec::new(),
            })
        })
    }

    /// 调用方的最小尺寸策略：小于阈值的图片不值得压缩
    pub fn should_compress(&self, size: u64) -> bool {
        size >= self.inner.config.skip_below_bytes
    }

    async fn execute(&self, data: Bytes, dedupe_key: Option<String>) -> CompressionOutcome {
        let started = Instant::now();
        let input_size = data.len() as u64;
        let tier = self.inner.config.tiers.select(input_size);
        let request = Arc::new(
            CompressionRequest::new(data, tier.target_width, tier.quality.clone())
                .with_dedupe_key(dedupe_key.as_deref()),
        );

        let eligible = self.eligible_providers();
        if eligible.is_empty() {
            let reason = if self.inner.providers.iter().any(|p| p.is_configured()) {
                "所有已配置 Provider 的熔断器均处于打开状态"
            } else {
                "没有已配置的 Provider"
            };
            tracing::warn!("[COMPRESS] size={} 无可用 Provider: {}", input_size, reason);
            self.inner
                .metrics
                .record_failure(input_size, started.elapsed().as_millis() as u64);
            return Err(CompressionError::NoProviderAvailable(reason.to_string()));
        }

        tracing::info!(
            "[COMPRESS] size={} quality={} width={} key={} providers=[{}]",
            input_size,
            request.quality,
            request.target_width,
            request.dedupe_key.as_deref().unwrap_or("-"),
            eligible
                .iter()
                .map(|(p, _)| p.id())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let outcome = self.race(eligible, request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    "[COMPRESS] 完成 provider={} method={} {} → {} bytes, {}ms",
                    result.provider,
                    result.method,
                    result.original_size,
                    result.output_size,
                    latency_ms
                );
                self.inner.metrics.record_success(
                    &result.provider,
                    input_size,
                    result.output_size,
                    latency_ms,
                );
            }
            Err(err) => {
                tracing::error!("[COMPRESS] 失败 category={:?}: {}", err.category(), err);
                self.inner.metrics.record_failure(input_size, latency_ms);
            }
        }
        outcome
    }

    /// 已配置且熔断器放行的 Provider（按优先级），附带放行时的熔断状态
    fn eligible_providers(&self) -> Vec<(SharedProvider, CircuitState)> {
        self.inner
            .providers
            .iter()
            .filter(|provider| provider.is_configured())
            .filter_map(|provider| {
                self.inner
                    .circuits
                    .try_acquire(provider.id())
                    .map(|admitted| (Arc::clone(provider), admitted))
            })
            .collect()
    }

    /// 并发竞速，第一个成功的结果胜出
    async fn race(
        &self,
        providers: Vec<(SharedProvider, CircuitState)>,
        request: Arc<CompressionRequest>,
    ) -> CompressionOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(providers.len());
        let attempted: Vec<String> = providers.iter().map(|(p, _)| p.id().to_string()).collect();

        for (provider, admitted) in providers {
            let guard = AttemptGuard {
                provider: provider.id().to_string(),
                circuits: Arc::clone(&self.inner.circuits),
                admitted,
                reporter: Some(tx.clone()),
            };
            let request = Arc::clone(&request);
            let retrier = self.inner.retrier.clone();

            handles.push(tokio::spawn(async move {
                let guard = guard;
                let outcome = retrier
                    .execute(&guard.provider, || provider.compress(&request))
                    .await;
                guard.settle(outcome);
            }));
        }
        drop(tx);

        let mut failures: Vec<ProviderFailure> = Vec::with_capacity(attempted.len());
        while let Some((provider, outcome)) = rx.recv().await {
            match outcome {
                Ok(result) => {
                    if self.inner.config.cancel_losing_attempts {
                        for handle in &handles {
                            handle.abort();
                        }
                    }
                    return Ok(result);
                }
                Err(error) => {
                    tracing::debug!("[COMPRESS] provider={} 落败: {}", provider, error);
                    failures.push(ProviderFailure { provider, error });
                }
            }
        }

        // 每个参与的 Provider 都要给出一条失败原因
        for provider in attempted {
            if !failures.iter().any(|f| f.provider == provider) {
                tracing::error!("[COMPRESS] provider={} 尝试未返回结果", provider);
                self.inner.circuits.record_failure(&provider);
                failures.push(ProviderFailure {
                    provider,
                    error: ProviderError::service(None, "压缩尝试未返回结果"),
                });
            }
        }
        Err(CompressionError::AllProvidersFailed { failures })
    }

    /// 探测所有 Provider（包括未配置的）
    pub async fn check_health(&self) -> HashMap<String, ProviderHealth> {
        let probes = self
            .inner
            .providers
            .iter()
            .map(|provider| async move { (provider.id().to_string(), provider.check_health().await) });
        join_all(probes).await.into_iter().collect()
    }

    pub async fn get_quotas(&self) -> HashMap<String, ProviderQuota> {
        let queries = self
            .inner
            .providers
            .iter()
            .map(|provider| async move { (provider.id().to_string(), provider.get_quota().await) });
        join_all(queries).await.into_iter().collect()
    }

    pub fn get_circuits(&self) -> HashMap<String, CircuitSnapshot> {
        self.inner.circuits.snapshot()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// 各 Provider 的脱敏调试信息
    pub fn provider_debug_info(&self) -> HashMap<String, serde_json::Value> {
        self.inner
            .providers
            .iter()
            .map(|provider| (provider.id().to_string(), provider.debug_info()))
            .collect()
    }

    /// 当前进行中的去重请求数
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use squashcast_core::{CircuitBreakerSettings, ErrorCategory, HealthStatus, RetrySettings};
    use squashcast_providers::CompressionProvider;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const KB: usize = 1024;

    struct MockProvider {
        id: &'static str,
        configured: bool,
        delay: Duration,
        /// 剩余失败次数，u32::MAX 表示一直失败
        failures_left: AtomicU32,
        error: ProviderError,
        calls: AtomicU32,
        completed: AtomicU32,
        panics: bool,
        last_request: Mutex<Option<(String, u32)>>,
        last_key: Mutex<Option<String>>,
    }

    impl MockProvider {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                configured: true,
                delay: Duration::ZERO,
                failures_left: AtomicU32::new(0),
                error: ProviderError::service(Some(500), "upstream error"),
                calls: AtomicU32::new(0),
                completed: AtomicU32::new(0),
                panics: false,
                last_request: Mutex::new(None),
                last_key: Mutex::new(None),
            }
        }

        fn unconfigured(id: &'static str) -> Self {
            Self {
                configured: false,
                ..Self::new(id)
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(self, times: u32) -> Self {
            self.failures_left.store(times, Ordering::SeqCst);
            self
        }

        fn panicking(mut self) -> Self {
            self.panics = true;
            self
        }

        fn with_error(mut self, error: ProviderError) -> Self {
            self.error = error;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompressionProvider for MockProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn compress(
            &self,
            request: &CompressionRequest,
        ) -> Result<CompressionResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some((request.quality.clone(), request.target_width));
            *self.last_key.lock() = request.dedupe_key.clone();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.panics {
                panic!("decoder crashed");
            }
            self.completed.fetch_add(1, Ordering::SeqCst);

            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                if left != u32::MAX {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                }
                return Err(self.error.clone());
            }

            let output = request.data.slice(..request.size() / 2);
            Ok(CompressionResult {
                original_size: request.size() as u64,
                output_size: output.len() as u64,
                data: output,
                method: format!("{}@{}px", self.id, request.target_width),
                provider: self.id.to_string(),
                quality: request.quality.clone(),
                latency_ms: self.delay.as_millis() as u64,
            })
        }

        async fn check_health(&self) -> ProviderHealth {
            if !self.configured {
                return ProviderHealth::unconfigured(self.id);
            }
            ProviderHealth::probed(self.id, HealthStatus::Ok, 5, "ok")
        }

        async fn get_quota(&self) -> ProviderQuota {
            ProviderQuota::new(self.calls() as u64, 500)
        }

        fn update_quota(&self, _used: u64) {}

        fn debug_info(&self) -> serde_json::Value {
            serde_json::json!({ "provider": self.id, "configured": self.configured })
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetrySettings {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            ..OrchestratorConfig::default()
        }
    }

    fn orchestrator(
        config: OrchestratorConfig,
        providers: &[Arc<MockProvider>],
    ) -> CompressionOrchestrator {
        let providers = providers
            .iter()
            .map(|p| Arc::clone(p) as SharedProvider)
            .collect();
        CompressionOrchestrator::with_providers(config, providers)
    }

    fn image(size: usize) -> Bytes {
        Bytes::from(vec![7u8; size])
    }

    #[tokio::test]
    async fn test_tier_follows_input_size() {
        let provider = Arc::new(MockProvider::new("tinypng"));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        let result = orchestrator.compress(image(400 * KB), None).await.unwrap();
        assert_eq!(result.quality, "good");
        assert_eq!(result.method, "tinypng@1000px");

        orchestrator.compress(image(2 * KB * KB), None).await.unwrap();
        assert_eq!(
            provider.last_request.lock().clone(),
            Some(("eco".to_string(), 800))
        );
    }

    #[tokio::test]
    async fn test_failed_provider_loses_race_to_healthy_one() {
        let failing = Arc::new(MockProvider::new("tinypng").failing(u32::MAX));
        let healthy = Arc::new(
            MockProvider::new("cloudinary").delayed(Duration::from_millis(30)),
        );
        let orchestrator = orchestrator(config(), &[failing.clone(), healthy.clone()]);

        let result = orchestrator.compress(image(10 * KB), None).await.unwrap();

        assert_eq!(result.provider, "cloudinary");
        let circuits = orchestrator.get_circuits();
        assert_eq!(circuits["tinypng"].failure_count, 1);
        assert_eq!(circuits["cloudinary"].failure_count, 0);

        let metrics = orchestrator.get_metrics();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 0);
        assert_eq!(metrics.provider_successes["cloudinary"], 1);
        assert_eq!(metrics.bytes_saved, 5 * KB as u64);
    }

    #[tokio::test]
    async fn test_open_circuit_excludes_provider() {
        let failing = Arc::new(MockProvider::new("tinypng").failing(u32::MAX));
        let healthy = Arc::new(
            MockProvider::new("cloudinary").delayed(Duration::from_millis(20)),
        );
        let orchestrator = orchestrator(config(), &[failing.clone(), healthy.clone()]);

        for _ in 0..3 {
            orchestrator.compress(image(KB), None).await.unwrap();
        }
        assert_eq!(failing.calls(), 3);
        assert_eq!(orchestrator.get_circuits()["tinypng"].state, CircuitState::Open);

        let result = orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(result.provider, "cloudinary");
        assert_eq!(failing.calls(), 3);
        assert_eq!(healthy.calls(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_calls_with_same_key_share_one_invocation() {
        let provider = Arc::new(MockProvider::new("tinypng").delayed(Duration::from_millis(30)));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        let (a, b) = tokio::join!(
            orchestrator.compress(image(100 * KB), Some("img1")),
            orchestrator.compress(image(100 * KB), Some("img1")),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.calls(), 1);
        assert_eq!(orchestrator.inflight_count(), 0);

        let metrics = orchestrator.get_metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.deduplicated_requests, 1);
    }

    #[tokio::test]
    async fn test_abandoned_keyed_call_still_settles() {
        let provider = Arc::new(MockProvider::new("tinypng").delayed(Duration::from_millis(30)));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            orchestrator.compress(image(KB), Some("k")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(orchestrator.inflight_count(), 0);
        assert_eq!(provider.calls(), 1);
        let metrics = orchestrator.get_metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);

        // 同键的新请求重新执行
        orchestrator.compress(image(KB), Some("k")).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_dedupe_key_is_passed_to_provider() {
        let provider = Arc::new(MockProvider::new("tinypng"));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        orchestrator.compress(image(KB), Some(" img9 ")).await.unwrap();
        assert_eq!(provider.last_key.lock().clone(), Some("img9".to_string()));

        orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(provider.last_key.lock().clone(), None);
    }

    #[tokio::test]
    async fn test_calls_without_key_run_independently() {
        let provider = Arc::new(MockProvider::new("tinypng").delayed(Duration::from_millis(10)));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        let (a, b) = tokio::join!(
            orchestrator.compress(image(KB), None),
            orchestrator.compress(image(KB), Some("  ")),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_configured_provider_fails_fast() {
        let provider = Arc::new(MockProvider::unconfigured("tinypng"));
        let orchestrator = orchestrator(config(), &[provider.clone()]);

        let err = orchestrator.compress(image(KB), Some("k")).await.unwrap_err();

        assert!(matches!(err, CompressionError::NoProviderAvailable(_)));
        assert_eq!(err.category(), ErrorCategory::Structural);
        assert_eq!(provider.calls(), 0);
        assert_eq!(orchestrator.get_metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_all_failures_are_reported_per_provider() {
        let a = Arc::new(
            MockProvider::new("tinypng")
                .failing(u32::MAX)
                .with_error(ProviderError::Quota("monthly limit".to_string())),
        );
        let b = Arc::new(
            MockProvider::new("cloudinary")
                .failing(u32::MAX)
                .with_error(ProviderError::Quota("credits".to_string())),
        );
        let orchestrator = orchestrator(config(), &[a, b]);

        let err = orchestrator.compress(image(KB), None).await.unwrap_err();

        let mut providers: Vec<_> = err.failures().iter().map(|f| f.provider.clone()).collect();
        providers.sort();
        assert_eq!(providers, vec!["cloudinary", "tinypng"]);
        assert_eq!(err.category(), ErrorCategory::Exhausted);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_retry_stays_within_provider() {
        let mut config = config();
        config.retry.max_attempts = 2;
        let provider = Arc::new(MockProvider::new("tinypng").failing(1));
        let orchestrator = orchestrator(config, &[provider.clone()]);

        let result = orchestrator.compress(image(KB), None).await.unwrap();

        assert_eq!(result.provider, "tinypng");
        assert_eq!(provider.calls(), 2);
        assert_eq!(orchestrator.get_circuits()["tinypng"].failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_grants_single_trial() {
        let config = OrchestratorConfig {
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 1,
                ..CircuitBreakerSettings::default()
            },
            ..config()
        };
        let provider = Arc::new(
            MockProvider::new("tinypng")
                .delayed(Duration::from_millis(100))
                .failing(1),
        );
        let orchestrator = orchestrator(config, &[provider.clone()]);

        assert!(orchestrator.compress(image(KB), None).await.is_err());
        assert_eq!(orchestrator.get_circuits()["tinypng"].state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        let (trial, rejected) = tokio::join!(
            orchestrator.compress(image(KB), None),
            orchestrator.compress(image(KB), None),
        );
        assert!(trial.is_ok());
        assert!(matches!(
            rejected,
            Err(CompressionError::NoProviderAvailable(_))
        ));
        assert_eq!(provider.calls(), 2);
        assert_eq!(
            orchestrator.get_circuits()["tinypng"].state,
            CircuitState::HalfOpen
        );

        orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(
            orchestrator.get_circuits()["tinypng"].state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_losing_attempts_can_be_cancelled() {
        let config = OrchestratorConfig {
            cancel_losing_attempts: true,
            ..config()
        };
        let fast = Arc::new(MockProvider::new("tinypng"));
        let slow = Arc::new(MockProvider::new("cloudinary").delayed(Duration::from_millis(50)));
        let orchestrator = orchestrator(config, &[fast, slow.clone()]);

        let result = orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(result.provider, "tinypng");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(slow.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_trial_returns_its_slot() {
        let config = OrchestratorConfig {
            cancel_losing_attempts: true,
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 1,
                ..CircuitBreakerSettings::default()
            },
            ..config()
        };
        let slow = Arc::new(
            MockProvider::new("tinypng")
                .delayed(Duration::from_millis(100))
                .failing(1),
        );
        let fast = Arc::new(
            MockProvider::new("cloudinary")
                .delayed(Duration::from_millis(1))
                .failing(1),
        );
        let orchestrator = orchestrator(config, &[slow.clone(), fast.clone()]);

        assert!(orchestrator.compress(image(KB), None).await.is_err());
        tokio::time::advance(Duration::from_secs(61)).await;

        // 两边都拿到半开试探，快的胜出，慢的被取消
        let result = orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(result.provider, "cloudinary");
        assert_eq!(slow.calls(), 2);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(slow.completed.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator.get_circuits()["tinypng"].state,
            CircuitState::HalfOpen
        );

        // 名额已归还，下一次调用仍会试探被取消的 Provider
        orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(slow.calls(), 3);
    }

    #[tokio::test]
    async fn test_panicking_attempt_is_reported_as_failure() {
        let crashing = Arc::new(MockProvider::new("tinypng").panicking());
        let failing = Arc::new(MockProvider::new("cloudinary").failing(u32::MAX));
        let orchestrator = orchestrator(config(), &[crashing, failing]);

        let err = orchestrator.compress(image(KB), None).await.unwrap_err();

        let mut providers: Vec<_> = err.failures().iter().map(|f| f.provider.clone()).collect();
        providers.sort();
        assert_eq!(providers, vec!["cloudinary", "tinypng"]);
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert_eq!(orchestrator.get_circuits()["tinypng"].failure_count, 1);
        assert_eq!(orchestrator.get_metrics().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_half_open_trial_reopens_circuit() {
        let config = OrchestratorConfig {
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 1,
                ..CircuitBreakerSettings::default()
            },
            ..config()
        };
        let crashing = Arc::new(MockProvider::new("tinypng").panicking());
        let orchestrator = orchestrator(config, &[crashing.clone()]);

        assert!(orchestrator.compress(image(KB), None).await.is_err());
        assert_eq!(orchestrator.get_circuits()["tinypng"].state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(orchestrator.compress(image(KB), None).await.is_err());
        assert_eq!(crashing.calls(), 2);
        assert_eq!(orchestrator.get_circuits()["tinypng"].state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(orchestrator.compress(image(KB), None).await.is_err());
        assert_eq!(crashing.calls(), 3);
    }

    #[tokio::test]
    async fn test_losing_attempts_run_to_completion_by_default() {
        let fast = Arc::new(MockProvider::new("tinypng"));
        let slow = Arc::new(
            MockProvider::new("cloudinary")
                .delayed(Duration::from_millis(30))
                .failing(u32::MAX),
        );
        let orchestrator = orchestrator(config(), &[fast, slow.clone()]);

        let result = orchestrator.compress(image(KB), None).await.unwrap();
        assert_eq!(result.provider, "tinypng");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(slow.completed.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.get_circuits()["cloudinary"].failure_count, 1);
    }

    #[tokio::test]
    async fn test_introspection_includes_every_provider() {
        let configured = Arc::new(MockProvider::new("tinypng"));
        let missing = Arc::new(MockProvider::unconfigured("cloudinary"));
        let orchestrator = orchestrator(config(), &[configured, missing]);

        let health = orchestrator.check_health().await;
        assert_eq!(health["tinypng"].status, HealthStatus::Ok);
        assert_eq!(health["cloudinary"].status, HealthStatus::Unconfigured);

        let quotas = orchestrator.get_quotas().await;
        assert_eq!(quotas.len(), 2);
        assert_eq!(quotas["tinypng"].limit, 500);

        let circuits = orchestrator.get_circuits();
        assert_eq!(circuits["cloudinary"].state, CircuitState::Closed);

        let debug = orchestrator.provider_debug_info();
        assert_eq!(debug["cloudinary"]["configured"], false);
    }

    #[test]
    fn test_should_compress_threshold() {
        let orchestrator = orchestrator(config(), &[]);
        assert!(!orchestrator.should_compress(10 * KB as u64));
        assert!(orchestrator.should_compress(50 * KB as u64));
        assert!(orchestrator.should_compress(5 * (KB * KB) as u64));
    }
}
