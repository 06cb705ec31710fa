//! Tests for the InferenceEngine detection contract

use chrono::{Local, TimeZone};
use image::RgbImage;
use pipewatch_core::{BoundingBox, DetectionHistory};
use pipewatch_eye::inference::{LoaderChain, ScriptedDetector};
use pipewatch_eye::{EyeConfig, Frame, InferenceEngine, RawDetection, VisionError};
use std::sync::Arc;

fn engine_with(detector: ScriptedDetector) -> (InferenceEngine, Arc<DetectionHistory>) {
    let config = EyeConfig::default();
    let history = Arc::new(DetectionHistory::new());
    let engine = InferenceEngine::new(
        &config,
        Arc::new(LoaderChain::for_config(&config)),
        history.clone(),
    );
    engine.install(Box::new(detector), "scripted");
    (engine, history)
}

fn frame() -> Frame {
    Frame::new(RgbImage::new(200, 200))
}

fn raw(class_name: &str, confidence: f64, bbox: (i32, i32, i32, i32)) -> RawDetection {
    RawDetection::new(class_name, confidence, BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3))
}

#[test]
fn test_confidence_filtering() {
    let (engine, history) = engine_with(ScriptedDetector::new(vec![vec![
        raw("crack", 0.9, (0, 0, 10, 10)),
        raw("crack", 0.4, (50, 50, 60, 60)),
        raw("crack", 0.6, (100, 100, 110, 110)),
    ]]));

    let detections = engine.detect(&frame(), None).unwrap();
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.confidence >= 0.5));
    assert_eq!(history.len(), 2);
}

#[test]
fn test_threshold_is_inclusive() {
    let (engine, _) = engine_with(ScriptedDetector::new(vec![vec![raw("rust", 0.5, (0, 0, 5, 5))]]));
    assert_eq!(engine.detect(&frame(), None).unwrap().len(), 1);
}

#[test]
fn test_overlapping_same_class_suppressed() {
    let (engine, _) = engine_with(ScriptedDetector::new(vec![vec![
        raw("crack", 0.6, (10, 10, 60, 60)),
        raw("crack", 0.8, (12, 12, 62, 62)),
    ]]));

    let detections = engine.detect(&frame(), None).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].confidence, 0.8);
}

#[test]
fn test_detections_stamped_with_capture_time_and_position() {
    let captured_at = Local.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
    let frame = Frame::with_timestamp(RgbImage::new(32, 32), captured_at);
    let (engine, history) = engine_with(ScriptedDetector::new(vec![vec![raw("leak", 0.95, (1, 1, 9, 9))]]));

    let detections = engine.detect(&frame, Some(42.5)).unwrap();
    assert_eq!(detections[0].captured_at, captured_at);
    assert_eq!(detections[0].position, Some(42.5));
    assert_eq!(history.snapshot()[0], detections[0]);
}

#[test]
fn test_backend_failure_is_an_error() {
    let (engine, history) = engine_with(ScriptedDetector::failing("tensor shape mismatch"));
    let result = engine.detect(&frame(), None);
    assert!(matches!(result, Err(VisionError::Inference(_))));
    assert!(history.is_empty());
}

#[test]
fn test_history_accumulates_across_frames() {
    let (engine, history) = engine_with(ScriptedDetector::new(vec![
        vec![raw("crack", 0.9, (0, 0, 10, 10))],
        vec![],
        vec![raw("rust", 0.7, (0, 0, 10, 10)), raw("crack", 0.8, (50, 50, 70, 70))],
    ]));
    for _ in 0..3 {
        engine.detect(&frame(), None).unwrap();
    }

    let summary = engine.summary();
    assert_eq!(history.len(), 3);
    assert_eq!(summary.by_class.get("crack"), Some(&2));
    assert_eq!(summary.by_class.get("rust"), Some(&1));
}

#[test]
fn test_annotate_returns_new_frame() {
    let (engine, _) = engine_with(ScriptedDetector::new(vec![vec![raw("crack", 0.9, (20, 40, 80, 90))]]));
    let input = frame();
    let before = input.image.clone();
    let detections = engine.detect(&input, None).unwrap();
    let annotated = engine.annotate(&input, &detections);
    assert_eq!(input.image, before);
    assert_ne!(annotated.image, before);
}
