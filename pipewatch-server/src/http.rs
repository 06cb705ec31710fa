// HTTP operational API: camera control, detections, reports and system status

use crate::services::Services;
use crate::websocket::video_stream_handler;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Local;
use pipewatch_core::{Error as CoreError, ReportFormat, ReportMetadata};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn core_error_response(e: &CoreError) -> Response {
    let status = match e {
        CoreError::NoData | CoreError::InvalidFormat(_) | CoreError::Configuration(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Io(_) | CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.code(), e.to_string())
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!("Internal error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.services.config.cors_origins);

    Router::new()
        .route("/", get(health_handler))
        .route("/api/system/status", get(system_status_handler))
        .route("/api/cameras/list", get(list_cameras_handler))
        .route(
            "/api/camera/source",
            get(get_camera_source_handler).post(set_camera_source_handler),
        )
        .route("/api/camera/start", post(start_camera_handler))
        .route("/api/camera/stop", post(stop_camera_handler))
        .route("/api/detections/history", get(detection_history_handler))
        .route("/api/detections/clear", delete(clear_detections_handler))
        .route("/api/report/generate", post(generate_report_handler))
        .route("/api/reports/list", get(list_reports_handler))
        .route("/api/report/download/:report_id", get(download_report_handler))
        .route("/ws/video", get(video_stream_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "service": "Pipewatch Inspection API",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Local::now().to_rfc3339(),
    }))
}

async fn system_status_handler(State(state): State<AppState>) -> Response {
    let services = &state.services;
    let uptime = Local::now().signed_duration_since(services.started_at);

    // Summarizing walks the whole history
    let history = services.history.clone();
    let (history_size, summary) = match tokio::task::spawn_blocking(move || {
        let snapshot = history.snapshot();
        (snapshot.len(), snapshot.summary())
    })
    .await
    {
        Ok(result) => result,
        Err(e) => return internal_error(e),
    };

    Json(json!({
        "camera": services.source.status(),
        "detector": services.engine.status(),
        "detections": {
            "history_size": history_size,
            "summary": summary,
        },
        "streaming": {
            "active_sessions": services.broadcaster.session_count(),
            "sessions": services.broadcaster.active_sessions(),
        },
        "uptime_seconds": uptime.num_seconds(),
        "timestamp": Local::now().to_rfc3339(),
    }))
    .into_response()
}

async fn list_cameras_handler(State(state): State<AppState>) -> Response {
    let source = state.services.source.clone();
    let max_index = state.services.config.probe_max_index;
    match tokio::task::spawn_blocking(move || source.probe(max_index)).await {
        Ok(cameras) => Json(json!({
            "count": cameras.len(),
            "cameras": cameras,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_camera_source_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.services.source.status();
    Json(json!({
        "source": status.source,
        "type": status.source_type,
        "is_opened": status.is_opened,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetSourceRequest {
    pub source: String,
}

async fn set_camera_source_handler(
    State(state): State<AppState>,
    Json(request): Json<SetSourceRequest>,
) -> Response {
    if request.source.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "INVALID_SOURCE", "Camera source must not be empty");
    }

    let source = state.services.source.clone();
    let address = request.source.clone();
    match tokio::task::spawn_blocking(move || source.replace(&address)).await {
        Ok(Ok(status)) => Json(json!({
            "status": "success",
            "source": status.source,
            "type": status.source_type,
            "is_opened": status.is_opened,
        }))
        .into_response(),
        Ok(Err(e)) => {
            warn!("Camera source change failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAMERA_OPEN_FAILED",
                format!("Failed to open camera source: {}", e),
            )
        }
        Err(e) => internal_error(e),
    }
}

async fn start_camera_handler(State(state): State<AppState>) -> Response {
    let source = state.services.source.clone();
    match tokio::task::spawn_blocking(move || source.ensure_open()).await {
        Ok(Ok(true)) => {
            info!("Camera started");
            Json(json!({ "status": "started" })).into_response()
        }
        Ok(Ok(false)) => Json(json!({ "status": "already started" })).into_response(),
        Ok(Err(e)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CAMERA_OPEN_FAILED",
            format!("Failed to open camera: {}", e),
        ),
        Err(e) => internal_error(e),
    }
}

async fn stop_camera_handler(State(state): State<AppState>) -> Response {
    let source = state.services.source.clone();
    match tokio::task::spawn_blocking(move || source.close()).await {
        Ok(()) => Json(json!({ "status": "stopped" })).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn detection_history_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit = match params.get("limit") {
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) => limit,
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "INVALID_LIMIT", "limit must be a non-negative integer")
            }
        },
        None => DEFAULT_HISTORY_LIMIT,
    };

    let history = &state.services.history;
    let detections = history.tail(limit);
    Json(json!({
        "total": history.len(),
        "returned": detections.len(),
        "detections": detections,
    }))
    .into_response()
}

async fn clear_detections_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.services.history.clear();
    info!("Detection history cleared");
    Json(json!({ "status": "cleared" }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateReportRequest {
    pub metadata: ReportMetadata,
    pub format: Option<String>,
}

async fn generate_report_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateReportRequest>,
) -> Response {
    let format = match request.format.as_deref().unwrap_or("both").parse::<ReportFormat>() {
        Ok(format) => format,
        Err(e) => return core_error_response(&e),
    };

    let snapshot = state.services.history.snapshot();
    let reports = state.services.reports.clone();
    let metadata = request.metadata;
    match tokio::task::spawn_blocking(move || reports.generate(&snapshot, metadata, format)).await {
        Ok(Ok(generated)) => {
            info!("Report {} generated ({} file(s))", generated.report_id, generated.files.len());
            Json(json!({
                "status": "success",
                "report_id": generated.report_id,
                "files": generated.files,
            }))
            .into_response()
        }
        Ok(Err(e)) => {
            if !matches!(e, CoreError::NoData) {
                error!("Report generation failed: {}", e);
            }
            core_error_response(&e)
        }
        Err(e) => internal_error(e),
    }
}

async fn list_reports_handler(State(state): State<AppState>) -> Response {
    let store = state.services.reports.store();
    match tokio::task::spawn_blocking(move || store.list()).await {
        Ok(Ok(reports)) => Json(json!({
            "count": reports.len(),
            "reports": reports,
        }))
        .into_response(),
        Ok(Err(e)) => core_error_response(&e),
        Err(e) => internal_error(e),
    }
}

/// Maps a download `format` to the artifact extension and its content type.
fn download_kind(format: &str) -> Result<(&'static str, &'static str), String> {
    match format.to_ascii_lowercase().as_str() {
        "txt" | "document" => Ok(("txt", "text/plain; charset=utf-8")),
        "json" => Ok(("json", "application/json")),
        "pdf" => Err("PDF output is not produced; the document report is available as format=txt".to_string()),
        other => Err(format!("Unsupported download format: {} (expected txt or json)", other)),
    }
}

async fn download_report_handler(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let format = params.get("format").map(String::as_str).unwrap_or("txt");
    let (extension, content_type) = match download_kind(format) {
        Ok(kind) => kind,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, "INVALID_FORMAT", message),
    };

    let path = match state.services.reports.store().locate(&report_id, extension) {
        Ok(path) => path,
        Err(e) => return core_error_response(&e),
    };

    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) => return internal_error(e),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.{}", report_id, extension));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        body,
    )
        .into_response()
}
