//! Provider 共用的 HTTP 工具

use reqwest::{Client, Response, StatusCode};
use squashcast_core::app_utils::preview_payload;
use squashcast_core::logger::sanitize_log_message;
use squashcast_core::ProviderError;
use std::time::Duration;

const CLIENT_TIMEOUT_SECS: u64 = 60;
const USER_AGENT: &str = concat!("squashcast/", env!("CARGO_PKG_VERSION"));

/// 创建 HTTP 客户端
///
/// 单次调用的超时由 `TimeoutController` 控制，这里只设一个宽松的兜底。
pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// reqwest 错误分类
pub(crate) fn classify_transport_error(operation: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        return ProviderError::timeout(operation, CLIENT_TIMEOUT_SECS * 1000);
    }
    ProviderError::Network(format!("{operation}: {}", sanitize_log_message(&error.to_string())))
}

/// 读取非成功响应，生成脱敏后的错误消息
pub(crate) async fn error_message(operation: &str, response: Response) -> (StatusCode, String) {
    let status = response.status();
    let payload = response.text().await.unwrap_or_default();
    let message = format!(
        "{operation} 失败 ({}): {}",
        status.as_u16(),
        sanitize_log_message(&preview_payload(&payload))
    );
    (status, message)
}

/// 读取响应体字节，空响应视为错误
pub(crate) async fn read_body(
    operation: &str,
    response: Response,
) -> Result<bytes::Bytes, ProviderError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| classify_transport_error(operation, e))?;
    if body.is_empty() {
        return Err(ProviderError::service(None, format!("{operation} 返回空内容")));
    }
    Ok(body)
}
