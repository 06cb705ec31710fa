//! Detection model wrapper
//!
//! The engine owns a pluggable [`DetectorBackend`] and enforces the
//! detection contract on top of it: confidence filtering, per-class
//! suppression, capture-time stamping and the history append.

#[cfg(feature = "onnx")]
mod onnx;
mod stub;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxLoader, YoloOnnxBackend, COCO_CLASSES};
pub use stub::{ScriptedDetector, StubDetector, StubLoader, STUB_MODEL_SCHEME};

use crate::annotate;
use crate::config::EyeConfig;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::nms;
use parking_lot::{Mutex, RwLock};
use pipewatch_core::{BoundingBox, Detection, DetectionHistory, DetectionSummary};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Unfiltered model output in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_name: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }
}

/// A loaded model.
pub trait DetectorBackend: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError>;
}

/// Turns a model path into a ready backend.
pub trait ModelLoader: Send + Sync {
    fn supports(&self, model_path: &str) -> bool;

    fn load(&self, model_path: &str) -> Result<Box<dyn DetectorBackend>, VisionError>;
}

/// Dispatches to the first loader that accepts a path.
#[derive(Default)]
pub struct LoaderChain {
    loaders: Vec<Arc<dyn ModelLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Loaders compiled into this build.
    pub fn for_config(config: &EyeConfig) -> Self {
        let chain = Self::new().with(Arc::new(StubLoader));
        #[cfg(feature = "onnx")]
        let chain = chain.with(Arc::new(OnnxLoader::new(
            config.class_names.clone(),
            config.confidence_threshold,
        )));
        #[cfg(not(feature = "onnx"))]
        let _ = config;
        chain
    }
}

impl ModelLoader for LoaderChain {
    fn supports(&self, model_path: &str) -> bool {
        self.loaders.iter().any(|l| l.supports(model_path))
    }

    fn load(&self, model_path: &str) -> Result<Box<dyn DetectorBackend>, VisionError> {
        match self.loaders.iter().find(|l| l.supports(model_path)) {
            Some(loader) => loader.load(model_path),
            None => Err(VisionError::Model(format!(
                "no model loader for {} (build with the onnx feature for .onnx models)",
                model_path
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_loaded: bool,
    pub model_path: Option<String>,
    pub backend: Option<&'static str>,
    pub confidence_threshold: f64,
    pub iou_threshold: f64,
}

pub struct InferenceEngine {
    confidence_threshold: f64,
    iou_threshold: f64,
    fallback_model_path: String,
    loader: Arc<dyn ModelLoader>,
    backend: Mutex<Option<Box<dyn DetectorBackend>>>,
    ready: AtomicBool,
    // Path and backend name of the installed model, readable while a detect
    // holds the backend lock.
    model_in_use: RwLock<Option<(String, &'static str)>>,
    history: Arc<DetectionHistory>,
}

impl InferenceEngine {
    pub fn new(config: &EyeConfig, loader: Arc<dyn ModelLoader>, history: Arc<DetectionHistory>) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            fallback_model_path: config.fallback_model_path.to_string_lossy().into_owned(),
            loader,
            backend: Mutex::new(None),
            ready: AtomicBool::new(false),
            model_in_use: RwLock::new(None),
            history,
        }
    }

    /// Load `model_path`, or the fallback model when the path does not exist.
    pub fn load(&self, model_path: &str) -> Result<(), VisionError> {
        let resolved = if is_virtual_model(model_path) || Path::new(model_path).exists() {
            model_path.to_string()
        } else {
            warn!(
                "Model not found at {}. Loading fallback model {}",
                model_path, self.fallback_model_path
            );
            self.fallback_model_path.clone()
        };

        match self.loader.load(&resolved) {
            Ok(backend) => {
                info!("Model loaded from {} ({})", resolved, backend.name());
                self.install(backend, resolved);
                Ok(())
            }
            Err(e) => {
                error!("Error loading model {}: {}", resolved, e);
                self.ready.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Replace the active backend with an already constructed one.
    pub fn install(&self, backend: Box<dyn DetectorBackend>, model_path: impl Into<String>) {
        let name = backend.name();
        *self.backend.lock() = Some(backend);
        *self.model_in_use.write() = Some((model_path.into(), name));
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Detect on one frame and record the result in the history.
    ///
    /// Returns an empty list until a model is loaded. A backend failure is
    /// an error, and nothing is recorded for that frame.
    pub fn detect(&self, frame: &Frame, position: Option<f64>) -> Result<Vec<Detection>, VisionError> {
        if !self.is_ready() {
            debug!("Detect called before a model is loaded");
            return Ok(Vec::new());
        }

        let raw = {
            let mut guard = self.backend.lock();
            let backend = match guard.as_mut() {
                Some(backend) => backend,
                None => return Ok(Vec::new()),
            };
            backend.infer(frame).map_err(|e| match e {
                VisionError::Inference(_) => e,
                other => VisionError::Inference(other.to_string()),
            })?
        };

        let candidates: Vec<RawDetection> = raw
            .into_iter()
            .filter(|d| d.confidence.is_finite() && d.confidence >= self.confidence_threshold)
            .collect();
        let detections: Vec<Detection> = nms::suppress(candidates, self.iou_threshold)
            .into_iter()
            .map(|d| Detection::new(d.class_name, d.confidence, d.bbox, frame.captured_at, position))
            .collect();

        self.history.append(&detections);
        Ok(detections)
    }

    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        annotate::annotate(frame, detections)
    }

    pub fn summary(&self) -> DetectionSummary {
        self.history.summary()
    }

    pub fn history(&self) -> &Arc<DetectionHistory> {
        &self.history
    }

    /// Does not wait on an in-progress detect.
    pub fn status(&self) -> EngineStatus {
        let model = self.model_in_use.read().clone();
        EngineStatus {
            is_loaded: self.is_ready(),
            model_path: model.as_ref().map(|(path, _)| path.clone()),
            backend: model.as_ref().map(|(_, name)| *name),
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
        }
    }
}

fn is_virtual_model(model_path: &str) -> bool {
    model_path.starts_with(STUB_MODEL_SCHEME)
}
