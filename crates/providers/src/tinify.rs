//! TinyPNG Provider
//!
//! 两阶段处理：
//! 1. `POST /shrink` 上传原图，得到压缩结果地址和本月用量；
//! 2. 对压缩结果发起 resize 请求。
//!
//! 第二阶段只是锦上添花：失败时退回下载第一阶段的结果，不让整个调用失败。
//! 收到 429 后标记额度耗尽，之后的调用不再发起网络请求；
//! 健康探测确认服务重新放行且用量低于上限时解除标记。

use crate::http::{build_client, classify_transport_error, error_message, read_body};
use crate::traits::CompressionProvider;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use squashcast_core::app_utils::mask_optional;
use squashcast_core::{
    CompressionRequest, CompressionResult, HealthStatus, ProviderError, ProviderHealth,
    ProviderQuota, TinifySettings, PROVIDER_TINYPNG,
};
use squashcast_infra::TimeoutController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const COMPRESSION_COUNT_HEADER: &str = "compression-count";

#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: ShrinkOutput,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    #[serde(default)]
    size: u64,
    #[serde(default)]
    width: Option<u32>,
    url: String,
}

/// TinyPNG Provider
pub struct TinifyProvider {
    client: Client,
    api_key: Option<String>,
    settings: TinifySettings,
    timeouts: TimeoutController,
    quota: Mutex<ProviderQuota>,
    exhausted: AtomicBool,
}

impl TinifyProvider {
    pub fn new(
        api_key: Option<String>,
        settings: TinifySettings,
        timeouts: TimeoutController,
    ) -> Self {
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        let quota = ProviderQuota::unknown(settings.monthly_limit);
        Self {
            client: build_client(),
            api_key,
            settings,
            timeouts,
            quota: Mutex::new(quota),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder.basic_auth("api", Some(api_key))
    }

    fn mark_exhausted(&self) {
        if !self.exhausted.swap(true, Ordering::SeqCst) {
            tracing::warn!("[TINIFY] 本月额度已耗尽，后续请求将直接跳过");
        }
        self.quota.lock().mark_exhausted();
    }

    /// 额度窗口已重置时解除耗尽标记
    fn restore_if_below_limit(&self, reported: Option<u64>) {
        let below_limit = reported.is_none_or(|used| used < self.settings.monthly_limit);
        if below_limit && self.exhausted.swap(false, Ordering::SeqCst) {
            tracing::info!(
                "[TINIFY] 额度已恢复, used={}",
                reported.map_or_else(|| "-".to_string(), |used| used.to_string())
            );
        }
    }

    /// 从响应头读取本月已用次数
    fn track_usage(&self, response: &Response) {
        if let Some(used) = reported_usage(response) {
            self.update_quota(used);
        }
    }

    async fn shrink(&self, api_key: &str, data: Bytes) -> Result<ShrinkOutput, ProviderError> {
        let response = self
            .authorized(self.client.post(self.endpoint("shrink")), api_key)
            .body(data)
            .send()
            .await
            .map_err(|e| classify_transport_error("tinypng.shrink", e))?;

        self.track_usage(&response);
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            self.mark_exhausted();
            let (_, message) = error_message("tinypng.shrink", response).await;
            return Err(ProviderError::Quota(message));
        }
        if !status.is_success() {
            let (status, message) = error_message("tinypng.shrink", response).await;
            return Err(ProviderError::service(Some(status.as_u16()), message));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let payload = response
            .text()
            .await
            .map_err(|e| classify_transport_error("tinypng.shrink", e))?;
        let mut parsed: ShrinkResponse = serde_json::from_str(&payload).map_err(|e| {
            ProviderError::service(Some(status.as_u16()), format!("shrink 响应解析失败: {e}"))
        })?;

        if parsed.output.url.trim().is_empty() {
            parsed.output.url = location.ok_or_else(|| {
                ProviderError::service(Some(status.as_u16()), "shrink 响应缺少输出地址")
            })?;
        }
        Ok(parsed.output)
    }

    async fn resize(&self, api_key: &str, url: &str, width: u32) -> Result<Bytes, ProviderError> {
        let response = self
            .authorized(self.client.post(url), api_key)
            .json(&json!({ "resize": { "method": "scale", "width": width } }))
            .send()
            .await
            .map_err(|e| classify_transport_error("tinypng.resize", e))?;

        self.track_usage(&response);
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.mark_exhausted();
        }
        if !status.is_success() {
            let (status, message) = error_message("tinypng.resize", response).await;
            return Err(ProviderError::service(Some(status.as_u16()), message));
        }
        read_body("tinypng.resize", response).await
    }

    async fn download(&self, api_key: &str, url: &str) -> Result<Bytes, ProviderError> {
        let response = self
            .authorized(self.client.get(url), api_key)
            .send()
            .await
            .map_err(|e| classify_transport_error("tinypng.download", e))?;

        if !response.status().is_success() {
            let (status, message) = error_message("tinypng.download", response).await;
            return Err(ProviderError::service(Some(status.as_u16()), message));
        }
        read_body("tinypng.download", response).await
    }
}

fn reported_usage(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(COMPRESSION_COUNT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[async_trait]
impl CompressionProvider for TinifyProvider {
    fn id(&self) -> &str {
        PROVIDER_TINYPNG
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn compress(
        &self,
        request: &CompressionRequest,
    ) -> Result<CompressionResult, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::NotConfigured)?;
        if self.is_exhausted() {
            return Err(ProviderError::Quota("TinyPNG 本月额度已耗尽".to_string()));
        }

        let started = Instant::now();
        let width = request.target_width;
        let shrunk = self
            .timeouts
            .transform("tinypng.shrink", self.shrink(api_key, request.data.clone()))
            .await?;

        tracing::debug!(
            "[TINIFY] shrink 完成: {} → {} bytes, width={:?}",
            request.size(),
            shrunk.size,
            shrunk.width
        );

        let (data, method) = match shrunk.width {
            Some(actual) if actual <= width => {
                let data = self
                    .timeouts
                    .download("tinypng.download", self.download(api_key, &shrunk.url))
                    .await?;
                (data, format!("{PROVIDER_TINYPNG}@{actual}px"))
            }
            _ => match self
                .timeouts
                .transform("tinypng.resize", self.resize(api_key, &shrunk.url, width))
                .await
            {
                Ok(data) => (data, format!("{PROVIDER_TINYPNG}@{width}px")),
                Err(err) => {
                    tracing::warn!("[TINIFY] resize 失败，退回未缩放的压缩结果: {}", err);
                    let data = self
                        .timeouts
                        .download("tinypng.download", self.download(api_key, &shrunk.url))
                        .await?;
                    (data, format!("{PROVIDER_TINYPNG}(no-resize)"))
                }
            },
        };

        Ok(CompressionResult {
            original_size: request.size() as u64,
            output_size: data.len() as u64,
            data,
            method,
            provider: PROVIDER_TINYPNG.to_string(),
            quality: request.quality.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        let Some(api_key) = self.api_key.as_deref() else {
            return ProviderHealth::unconfigured(PROVIDER_TINYPNG);
        };

        let started = Instant::now();
        // 空请求体返回 400 即说明服务可达且 Key 有效，不消耗额度
        let probe = self.timeouts.download("tinypng.health", async {
            self.authorized(self.client.post(self.endpoint("shrink")), api_key)
                .send()
                .await
                .map_err(|e| classify_transport_error("tinypng.health", e))
        });
        let response = probe.await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return ProviderHealth::probed(
                    PROVIDER_TINYPNG,
                    HealthStatus::Error,
                    latency_ms,
                    err.to_string(),
                )
            }
        };
        let reported = reported_usage(&response);
        let reachable =
            response.status() == StatusCode::BAD_REQUEST || response.status().is_success();
        if reachable {
            self.restore_if_below_limit(reported);
        }
        self.track_usage(&response);

        let (status, message) = match response.status() {
            _ if reachable && self.is_exhausted() => {
                (HealthStatus::Degraded, "本月额度已耗尽".to_string())
            }
            _ if reachable => (HealthStatus::Ok, "服务可达".to_string()),
            StatusCode::UNAUTHORIZED => (HealthStatus::Error, "API Key 无效".to_string()),
            StatusCode::TOO_MANY_REQUESTS => {
                self.mark_exhausted();
                (HealthStatus::Degraded, "本月额度已耗尽".to_string())
            }
            status => (
                HealthStatus::Error,
                format!("探测返回异常状态 {}", status.as_u16()),
            ),
        };

        let quota = self.quota.lock().clone();
        if status == HealthStatus::Ok && quota.percent_used >= 90.0 {
            return ProviderHealth::probed(
                PROVIDER_TINYPNG,
                HealthStatus::Degraded,
                latency_ms,
                format!("额度即将用完 ({}/{})", quota.used, quota.limit),
            );
        }
        ProviderHealth::probed(PROVIDER_TINYPNG, status, latency_ms, message)
    }

    async fn get_quota(&self) -> ProviderQuota {
        let mut quota = self.quota.lock().clone();
        if self.is_exhausted() && !quota.exhausted {
            quota.mark_exhausted();
        }
        quota
    }

    fn update_quota(&self, used: u64) {
        let mut quota = self.quota.lock();
        *quota = ProviderQuota::new(used, self.settings.monthly_limit);
        if self.exhausted.load(Ordering::SeqCst) {
            quota.mark_exhausted();
        }
    }

    fn debug_info(&self) -> serde_json::Value {
        let quota = self.quota.lock().clone();
        json!({
            "provider": PROVIDER_TINYPNG,
            "configured": self.is_configured(),
            "apiKey": mask_optional(self.api_key.as_deref()),
            "baseUrl": self.settings.base_url,
            "monthlyLimit": self.settings.monthly_limit,
            "compressionCount": quota.used,
            "exhausted": self.is_exhausted(),
        })
    }
}
