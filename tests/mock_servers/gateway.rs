//! Mock print gateway
//!
//! Serves the gateway's JSON endpoints from in-memory state and records
//! every mutating request so tests can assert on paths and bodies.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A POST or DELETE the gateway received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Value,
}

struct MockGatewayState {
    printers: Value,
    status: Value,
    files: Vec<Value>,
    /// When set, /api/printers answers 500
    printers_down: bool,
    /// When set, control endpoints answer 500 with this error
    control_error: Option<String>,
    snapshot_url: Option<String>,
    ha_urls: Vec<String>,
    requests: Vec<RecordedRequest>,
    status_calls: usize,
}

type Shared = Arc<RwLock<MockGatewayState>>;

pub struct MockGateway {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockGateway {
    /// Start a mock gateway on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockGatewayState {
            printers: json!([]),
            status: json!({}),
            files: Vec::new(),
            printers_down: false,
            control_error: None,
            snapshot_url: Some("/api/camera_proxy/camera.voron?token=abc".to_string()),
            ha_urls: Vec::new(),
            requests: Vec::new(),
            status_calls: 0,
        }));

        let app = Router::new()
            .route("/api/printers", get(printers))
            .route("/api/status", get(status))
            .route("/api/printer/{name}/print/{action}", post(control))
            .route("/api/printer/{name}/temperature", post(control))
            .route("/api/control/{name}/{action}", post(control))
            .route("/api/direct-control/{host}/{port}/{action}", post(control))
            .route("/api/gcode/send", post(control))
            .route("/api/camera/{name}/snapshot", get(snapshot))
            .route("/api/ha-info", get(ha_info))
            .route("/api/temperature-presets", get(presets))
            .route("/api/gcode/files", get(files))
            .route("/api/gcode/files/{name}", delete(delete_file))
            .route("/api/gcode/upload", post(upload))
            .route("/api/thumbnail/{name}", get(thumbnail))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn set_printers(&self, printers: Value) {
        self.state.write().await.printers = printers;
    }

    pub async fn set_status(&self, status: Value) {
        self.state.write().await.status = status;
    }

    pub async fn set_printers_down(&self, down: bool) {
        self.state.write().await.printers_down = down;
    }

    pub async fn set_control_error(&self, error: Option<&str>) {
        self.state.write().await.control_error = error.map(str::to_string);
    }

    pub async fn set_snapshot_url(&self, url: Option<&str>) {
        self.state.write().await.snapshot_url = url.map(str::to_string);
    }

    pub async fn set_ha_urls(&self, urls: &[&str]) {
        self.state.write().await.ha_urls = urls.iter().map(|u| u.to_string()).collect();
    }

    pub async fn add_file(&self, name: &str, size: u64) {
        self.state
            .write()
            .await
            .files
            .push(json!({"name": name, "size": size}));
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.read().await.requests.clone()
    }

    pub async fn status_calls(&self) -> usize {
        self.state.read().await.status_calls
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn envelope_error(error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": error})),
    )
        .into_response()
}

async fn record(state: &Shared, method: &'static str, path: String, body: Value) -> Option<String> {
    let mut state = state.write().await;
    state.requests.push(RecordedRequest { method, path, body });
    state.control_error.clone()
}

async fn printers(State(state): State<Shared>) -> Response {
    let state = state.read().await;
    if state.printers_down {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(state.printers.clone()).into_response()
}

async fn status(State(state): State<Shared>) -> Json<Value> {
    let mut state = state.write().await;
    state.status_calls += 1;
    Json(state.status.clone())
}

async fn control(
    State(state): State<Shared>,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().trim_start_matches('/').to_string();
    match record(&state, "POST", path, body).await {
        Some(error) => envelope_error(&error),
        None => Json(json!({"success": true})).into_response(),
    }
}

#[derive(Deserialize)]
struct SnapshotQuery {
    base_url: String,
}

async fn snapshot(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Response {
    let path = format!("api/camera/{name}/snapshot");
    record(&state, "GET", path, json!({"base_url": query.base_url})).await;
    match state.read().await.snapshot_url.clone() {
        Some(url) => Json(json!({"snapshot_url": url})).into_response(),
        None => envelope_error("Camera entity not found"),
    }
}

async fn ha_info(State(state): State<Shared>) -> Json<Value> {
    Json(json!({"suggested_base_urls": state.read().await.ha_urls.clone()}))
}

async fn presets() -> Json<Value> {
    Json(json!({"success": true, "presets": {"extruder": [0, 215, 245]}}))
}

async fn files(State(state): State<Shared>) -> Json<Value> {
    Json(Value::Array(state.read().await.files.clone()))
}

async fn delete_file(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    record(&state, "DELETE", format!("api/gcode/files/{name}"), Value::Null).await;
    let mut state = state.write().await;
    let before = state.files.len();
    state.files.retain(|f| f["name"] != name.as_str());
    if state.files.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "File not found"})),
        )
            .into_response();
    }
    Json(json!({"success": true})).into_response()
}

/// Multipart body is not parsed; the file name is pulled from the part header
async fn upload(State(state): State<Shared>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    let filename = text
        .split("filename=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap_or_default()
        .to_string();
    record(
        &state,
        "POST",
        "api/gcode/upload".to_string(),
        json!({"filename": filename}),
    )
    .await;
    state
        .write()
        .await
        .files
        .push(json!({"name": filename, "size": body.len()}));
    Json(json!({"success": true})).into_response()
}

async fn thumbnail(Path(name): Path<String>) -> Response {
    if name == "voron" {
        ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
