//! 测试用的假上游服务

use axum::body::Bytes;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

pub const TINIFY_PHASE1_BYTES: &[u8] = b"tinify-phase1-output";
pub const TINIFY_RESIZED_BYTES: &[u8] = b"tinify-resized-output";
pub const CLOUDINARY_ASSET_BYTES: &[u8] = b"cloudinary-transformed-asset";

async fn bind() -> (tokio::net::TcpListener, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("绑定测试端口失败");
    let addr = listener.local_addr().expect("读取测试端口失败");
    (listener, format!("http://{addr}"))
}

// ---------------------------------------------------------------------------
// TinyPNG
// ---------------------------------------------------------------------------

pub struct TinifyState {
    pub base_url: String,
    pub shrink_calls: AtomicU32,
    pub resize_calls: AtomicU32,
    pub download_calls: AtomicU32,
    pub empty_probes: AtomicU32,
    pub shrink_status: AtomicU16,
    pub resize_fails: AtomicBool,
    pub output_width: AtomicU32,
}

pub struct FakeTinify {
    pub base_url: String,
    pub state: Arc<TinifyState>,
}

impl FakeTinify {
    pub async fn start() -> Self {
        let (listener, base_url) = bind().await;
        let state = Arc::new(TinifyState {
            base_url: base_url.clone(),
            shrink_calls: AtomicU32::new(0),
            resize_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
            empty_probes: AtomicU32::new(0),
            shrink_status: AtomicU16::new(201),
            resize_fails: AtomicBool::new(false),
            output_width: AtomicU32::new(1600),
        });
        let router = Router::new()
            .route("/shrink", post(tinify_shrink))
            .route("/output/:id", post(tinify_resize).get(tinify_download))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self { base_url, state }
    }
}

fn compression_count() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Compression-Count", HeaderValue::from_static("42"));
    headers
}

async fn tinify_shrink(State(state): State<Arc<TinifyState>>, body: Bytes) -> Response {
    if body.is_empty() {
        state.empty_probes.fetch_add(1, Ordering::SeqCst);
        return (
            StatusCode::BAD_REQUEST,
            compression_count(),
            Json(json!({ "error": "InputMissing", "message": "Input file is empty" })),
        )
            .into_response();
    }

    state.shrink_calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.shrink_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::CREATED);
    if !status.is_success() {
        return (
            status,
            Json(json!({ "error": "Failure", "message": "fake failure" })),
        )
            .into_response();
    }

    let url = format!("{}/output/abc123", state.base_url);
    let mut headers = compression_count();
    if let Ok(location) = HeaderValue::from_str(&url) {
        headers.insert("Location", location);
    }
    (
        StatusCode::CREATED,
        headers,
        Json(json!({
            "input": { "size": body.len(), "type": "image/png" },
            "output": {
                "size": TINIFY_PHASE1_BYTES.len(),
                "type": "image/png",
                "width": state.output_width.load(Ordering::SeqCst),
                "height": 900,
                "ratio": 0.4,
                "url": url
            }
        })),
    )
        .into_response()
}

async fn tinify_resize(
    State(state): State<Arc<TinifyState>>,
    Path(_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.resize_calls.fetch_add(1, Ordering::SeqCst);
    if state.resize_fails.load(Ordering::SeqCst) || body["resize"]["width"].as_u64().is_none() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "resize failed").into_response();
    }
    (StatusCode::OK, compression_count(), TINIFY_RESIZED_BYTES).into_response()
}

async fn tinify_download(State(state): State<Arc<TinifyState>>, Path(_id): Path<String>) -> Response {
    state.download_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, TINIFY_PHASE1_BYTES).into_response()
}

// ---------------------------------------------------------------------------
// Cloudinary
// ---------------------------------------------------------------------------

pub struct CloudinaryState {
    pub base_url: String,
    pub upload_calls: AtomicU32,
    pub download_calls: AtomicU32,
    pub destroy_calls: AtomicU32,
    pub usage_calls: AtomicU32,
    pub upload_status: AtomicU16,
    pub used_percent: Mutex<f64>,
    pub last_upload: Mutex<Option<HashMap<String, String>>>,
    pub destroyed: Mutex<Vec<String>>,
}

pub struct FakeCloudinary {
    pub base_url: String,
    pub state: Arc<CloudinaryState>,
}

impl FakeCloudinary {
    pub async fn start() -> Self {
        let (listener, base_url) = bind().await;
        let state = Arc::new(CloudinaryState {
            base_url: base_url.clone(),
            upload_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
            destroy_calls: AtomicU32::new(0),
            usage_calls: AtomicU32::new(0),
            upload_status: AtomicU16::new(200),
            used_percent: Mutex::new(42.5),
            last_upload: Mutex::new(None),
            destroyed: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/v1_1/demo/image/upload", post(cloudinary_upload))
            .route("/v1_1/demo/image/destroy", post(cloudinary_destroy))
            .route("/v1_1/demo/usage", get(cloudinary_usage))
            .route("/res/*path", get(cloudinary_download))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self { base_url, state }
    }
}

async fn cloudinary_upload(
    State(state): State<Arc<CloudinaryState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.upload_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::OK);
    let public_id = params.get("public_id").cloned().unwrap_or_default();
    *state.last_upload.lock() = Some(params);

    if !status.is_success() {
        return (
            status,
            Json(json!({ "error": { "message": "Rate Limit Exceeded" } })),
        )
            .into_response();
    }

    Json(json!({
        "public_id": public_id,
        "format": "webp",
        "bytes": CLOUDINARY_ASSET_BYTES.len(),
        "width": 800,
        "secure_url": format!("{}/res/{}.webp", state.base_url, public_id),
    }))
    .into_response()
}

async fn cloudinary_download(
    State(state): State<Arc<CloudinaryState>>,
    Path(_path): Path<String>,
) -> Response {
    state.download_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, CLOUDINARY_ASSET_BYTES).into_response()
}

async fn cloudinary_destroy(
    State(state): State<Arc<CloudinaryState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    state.destroy_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(public_id) = params.get("public_id") {
        state.destroyed.lock().push(public_id.clone());
    }
    Json(json!({ "result": "ok" })).into_response()
}

async fn cloudinary_usage(State(state): State<Arc<CloudinaryState>>) -> Response {
    state.usage_calls.fetch_add(1, Ordering::SeqCst);
    let used_percent = *state.used_percent.lock();
    Json(json!({
        "plan": "Free",
        "credits": { "usage": 10.5, "limit": 25, "used_percent": used_percent }
    }))
    .into_response()
}

/// 等待后台任务完成某个条件
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
