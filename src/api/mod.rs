//! HTTP API handlers

use crate::app::{ActionRequest, Dashboard, DashboardView, Phase};
use crate::camera::ClientContext;
use crate::dispatch::{ActionError, Axis, ControlAction, HeaterType};
use crate::files::FileError;
use crate::modal::{CloseReason, ModalKind};
use crate::model::{GcodeFile, TemperaturePresets};
use crate::poller::PollOutcome;
use crate::render::UiFilters;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
}

impl AppState {
    pub fn new(dashboard: Arc<Dashboard>) -> Self {
        Self { dashboard }
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

fn ok_response() -> Response {
    Json(SuccessResponse { success: true }).into_response()
}

fn action_error_status(err: &ActionError) -> StatusCode {
    match err {
        ActionError::UnknownPrinter(_) => StatusCode::NOT_FOUND,
        ActionError::Invalid(_) => StatusCode::BAD_REQUEST,
        ActionError::MovementBusy(_) => StatusCode::CONFLICT,
        ActionError::Rejected(_) | ActionError::Gateway(_) => StatusCode::BAD_GATEWAY,
    }
}

fn action_result(result: Result<(), ActionError>) -> Response {
    match result {
        Ok(()) => ok_response(),
        Err(err) => error_response(action_error_status(&err), err.to_string()),
    }
}

fn file_result(result: Result<(), FileError>) -> Response {
    match result {
        Ok(()) => ok_response(),
        Err(err @ (FileError::EmptyName | FileError::NotGcode)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

/// Bodies that may be empty or absent. A body that is present must parse.
fn optional_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<Option<T>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| format!("Invalid request body: {e}"))
}

/// Reconstruct the page URL the viewer sees, honouring ingress headers
fn client_context(headers: &HeaderMap, page_url: Option<String>) -> ClientContext {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user_agent = header_str(header::USER_AGENT.as_str()).unwrap_or_default();
    let page_url = page_url
        .filter(|u| !u.trim().is_empty())
        .or_else(|| header_str(header::REFERER.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            let proto = header_str("x-forwarded-proto").unwrap_or("http");
            let host = header_str("x-forwarded-host")
                .or_else(|| header_str(header::HOST.as_str()))
                .unwrap_or("localhost");
            let ingress = header_str("x-ingress-path").unwrap_or("");
            format!("{proto}://{host}{ingress}/")
        });

    ClientContext::new(page_url, user_agent)
}

// =============================================================================
// Status and view
// =============================================================================

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub phase: Phase,
    pub printers: usize,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "print-farm-dashboard",
        version: env!("PFD_VERSION"),
        git_sha: env!("PFD_GIT_SHA"),
        phase: state.dashboard.displayed_phase().await,
        printers: state.dashboard.registry().len().await,
        bus_subscribers: state.dashboard.bus().subscriber_count(),
    })
}

/// GET /api/view - Full dashboard view state
pub async fn view_handler(State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.dashboard.view(chrono::Utc::now()).await)
}

/// POST /api/refresh - Poll now, or retry loading printers after a failure
pub async fn refresh_handler(State(state): State<AppState>) -> Response {
    match state.dashboard.refresh().await {
        Ok(PollOutcome::Failed(error)) => error_response(StatusCode::BAD_GATEWAY, error),
        Ok(_) => ok_response(),
        Err(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

/// POST /api/filters - Replace the status and type filters
pub async fn filters_handler(
    State(state): State<AppState>,
    Json(filters): Json<UiFilters>,
) -> Response {
    state.dashboard.set_filters(filters).await;
    ok_response()
}

#[derive(Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

/// POST /api/visibility - Pause polling while the page is hidden
pub async fn visibility_handler(
    State(state): State<AppState>,
    Json(req): Json<VisibilityRequest>,
) -> Response {
    state.dashboard.set_visibility(req.visible).await;
    ok_response()
}

#[derive(Deserialize)]
pub struct PreferencesRequest {
    #[serde(default)]
    pub active_tab: Option<String>,
}

/// POST /api/preferences - Persist the active tab
pub async fn preferences_handler(
    State(state): State<AppState>,
    Json(req): Json<PreferencesRequest>,
) -> Response {
    state.dashboard.set_active_tab(req.active_tab).await;
    ok_response()
}

/// GET /api/events - SSE stream of dashboard events
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.dashboard.bus().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(_) => None,
            },
            Err(_) => None, // Skip lagged messages
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// DELETE /api/notifications/{id} - Dismiss a toast
pub async fn dismiss_notification_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Response {
    if state.dashboard.dismiss_notification(id) {
        ok_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("Notification not found: {id}"))
    }
}

// =============================================================================
// Actions
// =============================================================================

#[derive(Serialize)]
struct ActionRequestResponse {
    success: bool,
    result: ActionRequest,
}

/// POST /api/printers/{name}/actions - Card button intent
pub async fn action_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(action): Json<ControlAction>,
) -> Response {
    match state.dashboard.request_action(&name, action).await {
        Ok(result) => Json(ActionRequestResponse {
            success: true,
            result,
        })
        .into_response(),
        Err(err) => error_response(action_error_status(&err), err.to_string()),
    }
}

/// POST /api/confirm - Confirm the open confirmation modal
pub async fn confirm_handler(State(state): State<AppState>) -> Response {
    action_result(state.dashboard.confirm().await)
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub reason: CloseReason,
}

/// POST /api/modals/{kind}/close - Close one modal
pub async fn close_modal_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Response {
    let Some(kind) = ModalKind::ALL.into_iter().find(|k| k.as_str() == kind) else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown modal: {kind}"));
    };
    let reason = match optional_json::<CloseRequest>(&body) {
        Ok(req) => req.map(|req| req.reason).unwrap_or(CloseReason::Button),
        Err(error) => return error_response(StatusCode::BAD_REQUEST, error),
    };
    state.dashboard.close_modal(kind, reason);
    ok_response()
}

#[derive(Serialize)]
pub struct EscapeResponse {
    pub success: bool,
    pub closed: Vec<ModalKind>,
}

/// POST /api/modals/escape - Close every open modal
pub async fn escape_handler(State(state): State<AppState>) -> Json<EscapeResponse> {
    Json(EscapeResponse {
        success: true,
        closed: state.dashboard.escape(),
    })
}

// =============================================================================
// Movement
// =============================================================================

/// POST /api/printers/{name}/movement - Open movement controls
pub async fn open_movement_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    action_result(state.dashboard.open_movement(&name).await)
}

#[derive(Deserialize)]
pub struct DistanceRequest {
    pub distance: f64,
}

/// POST /api/movement/distance - Select jog step
pub async fn jog_distance_handler(
    State(state): State<AppState>,
    Json(req): Json<DistanceRequest>,
) -> Response {
    if state.dashboard.select_jog_distance(req.distance) {
        ok_response()
    } else {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Unsupported jog distance: {}", req.distance),
        )
    }
}

#[derive(Deserialize)]
pub struct JogRequest {
    pub axis: Axis,
    pub direction: f64,
}

/// POST /api/movement/jog - Jog by the selected step
pub async fn jog_handler(State(state): State<AppState>, Json(req): Json<JogRequest>) -> Response {
    action_result(state.dashboard.jog(req.axis, req.direction).await)
}

#[derive(Deserialize)]
pub struct HomeRequest {
    #[serde(default)]
    pub axis: Option<Axis>,
}

/// POST /api/movement/home - Home one or all axes
pub async fn home_handler(State(state): State<AppState>, Json(req): Json<HomeRequest>) -> Response {
    action_result(state.dashboard.home(req.axis).await)
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Deserialize, Default)]
pub struct CameraRequest {
    #[serde(default)]
    pub page_url: Option<String>,
}

/// POST /api/printers/{name}/camera - Open the camera modal
pub async fn camera_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = match optional_json::<CameraRequest>(&body) {
        Ok(req) => req.unwrap_or_default(),
        Err(error) => return error_response(StatusCode::BAD_REQUEST, error),
    };
    let ctx = client_context(&headers, req.page_url);
    action_result(state.dashboard.open_camera(&name, &ctx).await)
}

// =============================================================================
// Temperature
// =============================================================================

/// GET /api/temperature-presets - Presets merged with defaults
pub async fn presets_handler(State(state): State<AppState>) -> Json<TemperaturePresets> {
    Json(state.dashboard.temperature_presets().await)
}

/// POST /api/printers/{name}/temperature/open - Open the temperature modal
pub async fn open_temperature_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    action_result(state.dashboard.open_temperature(&name).await)
}

#[derive(Deserialize)]
pub struct TemperatureRequest {
    pub heater: HeaterType,
    pub temperature: f64,
    #[serde(default)]
    pub heater_name: Option<String>,
}

/// POST /api/printers/{name}/temperature - Set a heater target
pub async fn temperature_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<TemperatureRequest>,
) -> Response {
    action_result(
        state
            .dashboard
            .set_temperature(&name, req.heater, req.temperature, req.heater_name)
            .await,
    )
}

// =============================================================================
// Files
// =============================================================================

/// GET /api/files - Stored G-code files
pub async fn files_handler(State(state): State<AppState>) -> Response {
    match state.dashboard.list_files().await {
        Ok(files) => Json::<Vec<GcodeFile>>(files).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// POST /api/files?name= - Upload a G-code file (raw body)
pub async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    file_result(state.dashboard.upload_file(&query.name, body.to_vec()).await)
}

/// POST /api/files/upload/open - Open the upload modal
pub async fn open_upload_handler(State(state): State<AppState>) -> Response {
    state.dashboard.open_upload();
    ok_response()
}

/// DELETE /api/files/{name} - Delete a stored file
pub async fn delete_file_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    file_result(state.dashboard.delete_file(&name).await)
}

#[derive(Deserialize)]
pub struct SendFileRequest {
    pub printer: String,
    pub file: String,
    #[serde(default = "default_true")]
    pub start: bool,
}

fn default_true() -> bool {
    true
}

/// POST /api/files/send - Send a stored file to a printer
pub async fn send_file_handler(
    State(state): State<AppState>,
    Json(req): Json<SendFileRequest>,
) -> Response {
    action_result(
        state
            .dashboard
            .send_file(&req.printer, &req.file, req.start)
            .await,
    )
}

// =============================================================================
// Thumbnails
// =============================================================================

#[derive(Deserialize)]
pub struct ThumbnailQuery {
    pub file: String,
}

fn image_response(content_type: String, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "max-age=60".to_string()),
        ],
        bytes,
    )
        .into_response()
}

/// GET /api/printers/{name}/thumbnail?file= - Card thumbnail (placeholder on failure)
pub async fn thumbnail_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Response {
    let thumbnail = state.dashboard.thumbnail(&name, &query.file).await;
    image_response(thumbnail.content_type, thumbnail.bytes)
}

#[derive(Serialize)]
pub struct BlobResponse {
    pub success: bool,
    pub blob: Option<u64>,
}

/// POST /api/printers/{name}/thumbnail/open?file= - Open the enlarged thumbnail modal
pub async fn open_thumbnail_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Json<BlobResponse> {
    let blob = state.dashboard.open_thumbnail(&name, &query.file).await;
    Json(BlobResponse {
        success: blob.is_some(),
        blob,
    })
}

/// GET /api/blobs/{id} - Temporary image owned by an open modal
pub async fn blob_handler(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.dashboard.blob(id) {
        Some(blob) => image_response(blob.content_type, blob.bytes),
        None => error_response(StatusCode::NOT_FOUND, format!("Blob not found: {id}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn context_prefers_explicit_page_url() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("ha.local:8123"));
        let ctx = client_context(&headers, Some("https://abc.ui.nabu.casa/".to_string()));
        assert_eq!(ctx.page_url, "https://abc.ui.nabu.casa/");
    }

    #[test]
    fn context_rebuilds_ingress_url_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("ha.local:8123"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert(
            "x-ingress-path",
            HeaderValue::from_static("/api/hassio_ingress/xyz"),
        );
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("Home Assistant/2024.1"),
        );
        let ctx = client_context(&headers, None);
        assert_eq!(ctx.page_url, "https://ha.local:8123/api/hassio_ingress/xyz/");
        assert!(ctx.is_ingress());
        assert!(ctx.is_ha_app());
    }

    #[test]
    fn optional_bodies() {
        assert!(optional_json::<CloseRequest>(b"").unwrap().is_none());
        assert!(optional_json::<CloseRequest>(b" \n").unwrap().is_none());
        let req = optional_json::<CloseRequest>(br#"{"reason":"backdrop"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(req.reason, CloseReason::Backdrop);
    }

    #[test]
    fn malformed_optional_body_is_rejected() {
        let err = optional_json::<CloseRequest>(b"not json").unwrap_err();
        assert!(err.starts_with("Invalid request body"));
        assert!(optional_json::<CloseRequest>(br#"{"reason":"sideways"}"#).is_err());
    }

    #[test]
    fn action_errors_map_to_statuses() {
        assert_eq!(
            action_error_status(&ActionError::MovementBusy("voron".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            action_error_status(&ActionError::Rejected("jammed".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
