//! Cloudinary Provider
//!
//! 单阶段处理：把质量、格式、宽度写进一个签名上传请求，上传后下载转换结果，
//! 再在后台删除临时资源。删除任务不被等待，失败只记日志。
//! 配额来自账户用量百分比，而不是逐次计数。

use crate::http::{build_client, classify_transport_error, error_message, read_body};
use crate::traits::CompressionProvider;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use squashcast_core::app_utils::{mask_optional, sniff_image_mime};
use squashcast_core::{
    CloudinaryCredentials, CloudinarySettings, CompressionRequest, CompressionResult,
    HealthStatus, ProviderError, ProviderHealth, ProviderQuota, PROVIDER_CLOUDINARY,
};
use squashcast_infra::TimeoutController;
use std::collections::BTreeMap;
use std::time::Instant;

/// 用量百分比上限
const USAGE_LIMIT_PERCENT: u64 = 100;
const DEGRADED_PERCENT: f64 = 90.0;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

/// 构建转换描述，例如 `q_auto:eco,f_webp,w_800,c_limit`
pub fn build_transformation(quality: &str, format: &str, width: u32) -> String {
    format!("q_auto:{quality},f_{format},w_{width},c_limit")
}

/// 计算签名：按键排序拼接 `k=v&k=v`，末尾追加 secret，取 SHA-256 十六进制
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cloudinary Provider
pub struct CloudinaryProvider {
    client: Client,
    credentials: Option<CloudinaryCredentials>,
    settings: CloudinarySettings,
    timeouts: TimeoutController,
    quota: Mutex<ProviderQuota>,
}

impl CloudinaryProvider {
    pub fn new(
        credentials: Option<CloudinaryCredentials>,
        settings: CloudinarySettings,
        timeouts: TimeoutController,
    ) -> Self {
        Self {
            client: build_client(),
            credentials: credentials.filter(CloudinaryCredentials::is_complete),
            settings,
            timeouts,
            quota: Mutex::new(ProviderQuota::unknown(USAGE_LIMIT_PERCENT)),
        }
    }

    fn api_url(&self, credentials: &CloudinaryCredentials, path: &str) -> String {
        format!(
            "{}/v1_1/{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            credentials.cloud_name,
            path
        )
    }

    fn quota_is_stale(&self) -> bool {
        let refresh = chrono::Duration::seconds(self.settings.quota_refresh_secs as i64);
        match self.quota.lock().last_checked {
            Some(checked) => chrono::Utc::now() - checked >= refresh,
            None => true,
        }
    }

    async fn upload(
        &self,
        credentials: &CloudinaryCredentials,
        request: &CompressionRequest,
    ) -> Result<UploadResponse, ProviderError> {
        let transformation = build_transformation(
            &request.quality,
            &self.settings.format,
            request.target_width,
        );
        let public_id = format!(
            "{}/{}",
            self.settings.folder.trim_matches('/'),
            uuid::Uuid::new_v4().simple()
        );

        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        params.insert("public_id", public_id);
        params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
        params.insert("transformation", transformation);
        let signature = sign_params(&params, &credentials.api_secret);

        let file = format!(
            "data:{};base64,{}",
            sniff_image_mime(&request.data),
            BASE64.encode(&request.data)
        );
        let mut form: Vec<(&str, String)> = params.into_iter().collect();
        form.push(("file", file));
        form.push(("api_key", credentials.api_key.clone()));
        form.push(("signature", signature));
        form.push(("signature_algorithm", "sha256".to_string()));

        let response = self
            .client
            .post(self.api_url(credentials, "image/upload"))
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_transport_error("cloudinary.upload", e))?;

        let status = response.status();
        // Cloudinary 用 420 表示账户限流
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
            self.quota.lock().mark_exhausted();
            let (_, message) = error_message("cloudinary.upload", response).await;
            return Err(ProviderError::Quota(message));
        }
        if !status.is_success() {
            let (status, message) = error_message("cloudinary.upload", response).await;
            return Err(ProviderError::service(Some(status.as_u16()), message));
        }

        let payload = response
            .text()
            .await
            .map_err(|e| classify_transport_error("cloudinary.upload", e))?;
        serde_json::from_str(&payload).map_err(|e| {
            ProviderError::service(Some(status.as_u16()), format!("上传响应解析失败: {e}"))
        })
    }

    async fn download(&self, url: &str) -> Result<Bytes, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport_error("cloudinary.download", e))?;
        if !response.status().is_success() {
            let (status, message) = error_message("cloudinary.download", response).await;
            return Err(ProviderError::service(Some(status.as_u16()), message));
        }
        read_body("cloudinary.download", response).await
    }

    /// 后台删除临时资源，不等待结果
    fn spawn_cleanup(&self, credentials: &CloudinaryCredentials, public_id: String) {
        let client = self.client.clone();
        let url = self.api_url(credentials, "image/destroy");
        let credentials = credentials.clone();
        let limit = self.timeouts.config().download;

        tokio::spawn(async move {
            let mut params: BTreeMap<&str, String> = BTreeMap::new();
            params.insert("public_id", public_id.clone());
            params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
            let signature = sign_params(&params, &credentials.api_secret);

            let mut form: Vec<(&str, String)> = params.into_iter().collect();
            form.push(("api_key", credentials.api_key.clone()));
            form.push(("signature", signature));
            form.push(("signature_algorithm", "sha256".to_string()));

            let outcome = TimeoutController::run("cloudinary.destroy", limit, async {
                let response = client
                    .post(url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| classify_transport_error("cloudinary.destroy", e))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    let (status, message) = error_message("cloudinary.destroy", response).await;
                    Err(ProviderError::service(Some(status.as_u16()), message))
                }
            })
            .await;

            match outcome {
                Ok(()) => tracing::debug!("[CLOUDINARY] 临时资源已删除: {}", public_id),
                Err(err) => tracing::warn!("[CLOUDINARY] 删除临时资源失败 {}: {}", public_id, err),
            }
        });
    }

    /// 查询账户用量
    async fn fetch_usage(
        &self,
        credentials: &CloudinaryCredentials,
    ) -> Result<f64, ProviderError> {
        let limit = self.timeouts.config().download;
        TimeoutController::run("cloudinary.usage", limit, async {
            let response = self
                .client
                .get(self.api_url(credentials, "usage"))
                .basic_auth(&credentials.api_key, Some(&credentials.api_secret))
                .send()
                .await
                .map_err(|e| classify_transport_error("cloudinary.usage", e))?;

            let status = response.status();
            if !status.is_success() {
                let (status, message) = error_message("cloudinary.usage", response).await;
                return Err(ProviderError::service(Some(status.as_u16()), message));
            }
            let value: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::service(Some(status.as_u16()), e.to_string()))?;
            extract_used_percent(&value).ok_or_else(|| {
                ProviderError::service(Some(status.as_u16()), "用量响应缺少 used_percent")
            })
        })
        .await
    }

    fn store_usage(&self, used_percent: f64) {
        let mut quota = ProviderQuota::new(used_percent.round().max(0.0) as u64, USAGE_LIMIT_PERCENT);
        quota.percent_used = used_percent.clamp(0.0, 100.0);
        *self.quota.lock() = quota;
    }
}

fn extract_used_percent(value: &Value) -> Option<f64> {
    value
        .pointer("/credits/used_percent")
        .or_else(|| value.get("used_percent"))
        .and_then(Value::as_f64)
}

#[async_trait]
impl CompressionProvider for CloudinaryProvider {
    fn id(&self) -> &str {
        PROVIDER_CLOUDINARY
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn compress(
        &self,
        request: &CompressionRequest,
    ) -> Result<CompressionResult, ProviderError> {
        let credentials = self.credentials.as_ref().ok_or(ProviderError::NotConfigured)?;
        let started = Instant::now();

        let uploaded = self
            .timeouts
            .transform("cloudinary.upload", self.upload(credentials, request))
            .await?;

        let downloaded = self
            .timeouts
            .download("cloudinary.download", self.download(&uploaded.secure_url))
            .await;
        self.spawn_cleanup(credentials, uploaded.public_id);
        let data = downloaded?;

        tracing::debug!(
            "[CLOUDINARY] 转换完成: {} → {} bytes",
            request.size(),
            data.len()
        );

        Ok(CompressionResult {
            original_size: request.size() as u64,
            output_size: data.len() as u64,
            data,
            method: format!("{PROVIDER_CLOUDINARY}@{}px", request.target_width),
            provider: PROVIDER_CLOUDINARY.to_string(),
            quality: request.quality.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        let Some(credentials) = self.credentials.as_ref() else {
            return ProviderHealth::unconfigured(PROVIDER_CLOUDINARY);
        };

        let started = Instant::now();
        let usage = self.fetch_usage(credentials).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match usage {
            Ok(used_percent) => {
                self.store_usage(used_percent);
                if used_percent >= DEGRADED_PERCENT {
                    ProviderHealth::probed(
                        PROVIDER_CLOUDINARY,
                        HealthStatus::Degraded,
                        latency_ms,
                        format!("账户用量 {used_percent:.1}%"),
                    )
                } else {
                    ProviderHealth::probed(
                        PROVIDER_CLOUDINARY,
                        HealthStatus::Ok,
                        latency_ms,
                        "服务可达",
                    )
                }
            }
            Err(err) => ProviderHealth::probed(
                PROVIDER_CLOUDINARY,
                HealthStatus::Error,
                latency_ms,
                err.to_string(),
            ),
        }
    }

    async fn get_quota(&self) -> ProviderQuota {
        if let Some(credentials) = self.credentials.as_ref() {
            if self.quota_is_stale() {
                match self.fetch_usage(credentials).await {
                    Ok(used_percent) => self.store_usage(used_percent),
                    Err(err) => tracing::warn!("[CLOUDINARY] 刷新用量失败: {}", err),
                }
            }
        }
        self.quota.lock().clone()
    }

    fn update_quota(&self, used: u64) {
        *self.quota.lock() = ProviderQuota::new(used, USAGE_LIMIT_PERCENT);
    }

    fn debug_info(&self) -> serde_json::Value {
        let quota = self.quota.lock().clone();
        json!({
            "provider": PROVIDER_CLOUDINARY,
            "configured": self.is_configured(),
            "cloudName": self.credentials.as_ref().map(|c| c.cloud_name.clone()),
            "apiKey": mask_optional(self.credentials.as_ref().map(|c| c.api_key.as_str())),
            "apiSecret": self.credentials.as_ref().map(|_| "****"),
            "baseUrl": self.settings.base_url,
            "format": self.settings.format,
            "folder": self.settings.folder,
            "usedPercent": quota.percent_used,
            "quotaRefreshSecs": self.settings.quota_refresh_secs,
        })
    }
}
