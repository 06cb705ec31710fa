//! Process-wide services, constructed once in `main` and shared by handlers.

use crate::broadcaster::{StreamBroadcaster, StreamSettings};
use crate::config::ServerConfig;
use anyhow::Context;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use pipewatch_core::{DetectionHistory, ReportAggregator};
use pipewatch_eye::error::ReadError;
use pipewatch_eye::source::{default_backend, probe_usb};
use pipewatch_eye::{
    CaptureBackend, CaptureSettings, Frame, InferenceEngine, LoaderChain, ModelLoader,
    SourceDescriptor, SourceStatus, VideoSource, VisionError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// The single video source every session reads from.
///
/// Reads, open/close and replacement all go through one lock, so a source is
/// never swapped out in the middle of a read. Status is served from a cell
/// refreshed on every state change and never touches that lock.
pub struct SharedSource {
    inner: Arc<Mutex<VideoSource>>,
    status: RwLock<SourceStatus>,
    // At most one blocking read runs at a time. A read that outlives its
    // caller's timeout is parked here and awaited by the next caller.
    in_flight: tokio::sync::Mutex<Option<JoinHandle<Result<Frame, ReadError>>>>,
    reads_started: AtomicU64,
    backend: Arc<dyn CaptureBackend>,
    settings: CaptureSettings,
}

impl SharedSource {
    pub fn new(descriptor: SourceDescriptor, settings: CaptureSettings, backend: Arc<dyn CaptureBackend>) -> Self {
        let source = VideoSource::new(descriptor, settings, backend.clone());
        Self {
            status: RwLock::new(source.status()),
            inner: Arc::new(Mutex::new(source)),
            in_flight: tokio::sync::Mutex::new(None),
            reads_started: AtomicU64::new(0),
            backend,
            settings,
        }
    }

    fn publish(&self, source: &VideoSource) {
        *self.status.write() = source.status();
    }

    /// Open the source unless it already is. Returns true when this call opened it.
    pub fn ensure_open(&self) -> Result<bool, VisionError> {
        let mut source = self.inner.lock();
        if source.is_open() {
            return Ok(false);
        }
        let result = source.open();
        self.publish(&source);
        result.map(|_| true)
    }

    /// Read one frame off the async workers, giving up after `timeout`.
    ///
    /// A timed-out read keeps running and is picked up by the next call
    /// instead of a new read being queued behind it.
    pub async fn read_timeout(&self, timeout: Duration) -> Result<Frame, String> {
        let deadline = Instant::now() + timeout;
        let timed_out = || format!("read timed out after {:?}", timeout);

        let mut slot = match tokio::time::timeout_at(deadline, self.in_flight.lock()).await {
            Ok(slot) => slot,
            Err(_) => return Err(timed_out()),
        };

        let mut read = match slot.take() {
            Some(pending) => pending,
            None => {
                let inner = self.inner.clone();
                self.reads_started.fetch_add(1, Ordering::SeqCst);
                tokio::task::spawn_blocking(move || inner.lock().read())
            }
        };

        match tokio::time::timeout_at(deadline, &mut read).await {
            Ok(Ok(Ok(frame))) => Ok(frame),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("read task failed: {}", e)),
            Err(_) => {
                *slot = Some(read);
                Err(timed_out())
            }
        }
    }

    /// Number of backend reads issued so far.
    pub fn reads_started(&self) -> u64 {
        self.reads_started.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        let mut source = self.inner.lock();
        source.close();
        self.publish(&source);
    }

    pub fn is_open(&self) -> bool {
        self.status.read().is_opened
    }

    /// Close the current source and switch to `address`.
    ///
    /// The new source stays installed even when it fails to open, so status
    /// reflects what was asked for.
    pub fn replace(&self, address: &str) -> Result<SourceStatus, VisionError> {
        let descriptor = SourceDescriptor::parse(address)?;
        let mut source = self.inner.lock();
        source.close();
        *source = VideoSource::new(descriptor, self.settings, self.backend.clone());
        info!("Camera source changed to {}", source.descriptor().display_address());
        let result = source.open();
        self.publish(&source);
        result.map(|_| source.status())
    }

    /// Last published status; does not wait on an in-progress read.
    pub fn status(&self) -> SourceStatus {
        self.status.read().clone()
    }

    pub fn probe(&self, max_index: u32) -> Vec<u32> {
        probe_usb(self.backend.as_ref(), max_index, &self.settings)
    }
}

pub struct Services {
    pub config: Arc<ServerConfig>,
    pub source: Arc<SharedSource>,
    pub engine: Arc<InferenceEngine>,
    pub history: Arc<DetectionHistory>,
    pub reports: Arc<ReportAggregator>,
    pub broadcaster: Arc<StreamBroadcaster>,
    pub started_at: DateTime<Local>,
}

impl Services {
    /// Wire services with the capture backend and model loaders compiled into this build.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let loader = Arc::new(LoaderChain::for_config(&config.eye_config()));
        Self::build(config, default_backend(), loader)
    }

    pub fn build(
        config: ServerConfig,
        capture: Arc<dyn CaptureBackend>,
        loader: Arc<dyn ModelLoader>,
    ) -> anyhow::Result<Self> {
        let eye = config.eye_config();
        eye.validate().map_err(|e| anyhow::anyhow!("Invalid vision configuration: {}", e))?;

        let descriptor = SourceDescriptor::parse(&config.camera_source)?;
        let source = Arc::new(SharedSource::new(descriptor, eye.capture_settings(), capture));

        let history = Arc::new(DetectionHistory::with_capacity_limit(config.history_capacity));
        let engine = Arc::new(InferenceEngine::new(&eye, loader, history.clone()));

        let reports = ReportAggregator::standard(
            &config.reports_dir,
            config.enable_document_report,
            config.enable_json_report,
        )
        .with_context(|| format!("Failed to prepare reports directory {}", config.reports_dir.display()))?;

        let broadcaster = Arc::new(StreamBroadcaster::new(
            source.clone(),
            engine.clone(),
            StreamSettings::from_config(&config),
        ));

        Ok(Self {
            config: Arc::new(config),
            source,
            engine,
            history,
            reports: Arc::new(reports),
            broadcaster,
            started_at: Local::now(),
        })
    }

    /// Load the configured model. Failure leaves the engine in degraded mode.
    pub fn load_model(&self) -> Result<(), VisionError> {
        self.engine.load(&self.config.model_path)
    }
}
