//! Router tests driven through tower's oneshot

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Local;
use pipewatch_core::{BoundingBox, Detection};
use pipewatch_eye::source::SyntheticBackend;
use pipewatch_eye::LoaderChain;
use pipewatch_server::{create_router, AppState, ServerConfig, Services};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn setup() -> (TempDir, Arc<Services>, Router) {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        camera_source: "stub://line".to_string(),
        reports_dir: dir.path().join("reports"),
        ..ServerConfig::default()
    };
    let loader = Arc::new(LoaderChain::for_config(&config.eye_config()));
    let services = Arc::new(Services::build(config, Arc::new(SyntheticBackend::new(2)), loader).unwrap());
    let router = create_router(AppState::new(services.clone()));
    (dir, services, router)
}

fn record(services: &Services, class_name: &str, confidence: f64) {
    services.history.append(&[Detection::new(
        class_name,
        confidence,
        BoundingBox::new(0, 0, 10, 10),
        Local::now(),
        None,
    )]);
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn call_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(router, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (_dir, _, router) = setup();
    let (status, body) = call_json(&router, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_system_status() {
    let (_dir, services, router) = setup();
    record(&services, "crack", 0.9);
    let (status, body) = call_json(&router, "GET", "/api/system/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detections"]["history_size"], 1);
    assert_eq!(body["detections"]["summary"]["by_class"]["crack"], 1);
    assert_eq!(body["streaming"]["active_sessions"], 0);
    assert_eq!(body["camera"]["is_opened"], false);
}

#[tokio::test]
async fn test_camera_lifecycle() {
    let (_dir, _, router) = setup();

    let (_, body) = call_json(&router, "POST", "/api/camera/start", None).await;
    assert_eq!(body["status"], "started");
    let (_, body) = call_json(&router, "POST", "/api/camera/start", None).await;
    assert_eq!(body["status"], "already started");

    let (_, body) = call_json(&router, "GET", "/api/camera/source", None).await;
    assert_eq!(body["source"], "stub://line");
    assert_eq!(body["is_opened"], true);

    let (status, body) = call_json(&router, "POST", "/api/camera/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    let (_, body) = call_json(&router, "GET", "/api/camera/source", None).await;
    assert_eq!(body["is_opened"], false);
}

#[tokio::test]
async fn test_set_camera_source() {
    let (_dir, _, router) = setup();

    let (status, body) = call_json(&router, "POST", "/api/camera/source", Some(json!({ "source": "1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "USB");
    assert_eq!(body["is_opened"], true);

    let (status, body) = call_json(
        &router,
        "POST",
        "/api/camera/source",
        Some(json!({ "source": "rtsp://nowhere/stream" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "CAMERA_OPEN_FAILED");

    let (status, body) = call_json(&router, "POST", "/api/camera/source", Some(json!({ "source": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SOURCE");
}

#[tokio::test]
async fn test_list_cameras() {
    let (_dir, _, router) = setup();
    let (_, body) = call_json(&router, "GET", "/api/cameras/list", None).await;
    assert_eq!(body["cameras"], json!([0, 1]));
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_history_limit_and_clear() {
    let (_dir, services, router) = setup();
    record(&services, "crack", 0.9);
    record(&services, "rust", 0.7);
    record(&services, "leak", 0.8);

    let (_, body) = call_json(&router, "GET", "/api/detections/history?limit=2", None).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["returned"], 2);
    assert_eq!(body["detections"][1]["class_name"], "leak");

    let (status, _) = call_json(&router, "DELETE", "/api/detections/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(services.history.is_empty());
}

#[tokio::test]
async fn test_generate_without_detections() {
    let (_dir, _, router) = setup();
    let (status, body) = call_json(&router, "POST", "/api/report/generate", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "NO_DATA");
}

#[tokio::test]
async fn test_generate_rejects_unknown_format() {
    let (_dir, services, router) = setup();
    record(&services, "crack", 0.9);
    let (status, body) = call_json(
        &router,
        "POST",
        "/api/report/generate",
        Some(json!({ "format": "docx" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
}

#[tokio::test]
async fn test_generate_list_and_download() {
    let (_dir, services, router) = setup();
    record(&services, "crack", 0.9);
    record(&services, "rust", 0.7);

    let (status, body) = call_json(
        &router,
        "POST",
        "/api/report/generate",
        Some(json!({
            "metadata": { "location": "Line 4", "inspector": "J. Doe" },
            "format": "both"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let report_id = body["report_id"].as_str().unwrap().to_string();
    assert!(body["files"]["json"].is_string());
    assert!(body["files"]["txt"].is_string());

    let (_, body) = call_json(&router, "GET", "/api/reports/list", None).await;
    assert_eq!(body["count"], 2);

    let (status, bytes) = call(
        &router,
        "GET",
        &format!("/api/report/download/{}?format=json", report_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["metadata"]["location"], "Line 4");
    assert_eq!(report["summary"]["total_detections"], 2);

    let (status, bytes) = call(&router, "GET", &format!("/api/report/download/{}", report_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(bytes).unwrap().contains("Line 4"));
}

#[tokio::test]
async fn test_download_missing_report() {
    let (_dir, _, router) = setup();
    let (status, body) = call_json(&router, "GET", "/api/report/download/20200101_000000?format=json", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = call_json(&router, "GET", "/api/report/download/x?format=docx", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
}

#[tokio::test]
async fn test_pdf_download_points_at_text_document() {
    let (_dir, services, router) = setup();
    record(&services, "leak", 0.95);
    let (_, body) = call_json(&router, "POST", "/api/report/generate", Some(json!({ "format": "document" }))).await;
    let report_id = body["report_id"].as_str().unwrap().to_string();

    let (status, body) = call_json(
        &router,
        "GET",
        &format!("/api/report/download/{}?format=pdf", report_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
    assert!(body["error"].as_str().unwrap().contains("format=txt"));

    let (status, _) = call(
        &router,
        "GET",
        &format!("/api/report/download/{}?format=txt", report_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
