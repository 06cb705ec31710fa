//! Video acquisition: source addressing, capture backends and the
//! open/read/close state machine around a single capture handle.

#[cfg(feature = "opencv")]
mod capture_cv;
mod synthetic;

#[cfg(feature = "opencv")]
pub use capture_cv::OpenCvBackend;
pub use synthetic::{SyntheticBackend, SYNTHETIC_SCHEME};

use crate::error::{ReadError, VisionError};
use crate::frame::Frame;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const MAX_LOGGED_ADDRESS: usize = 60;

/// Transport family of a network source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamScheme {
    Rtsp,
    Http,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Usb,
    NetworkStream(StreamScheme),
}

/// Parsed camera address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    address: String,
    kind: SourceKind,
    index: Option<i32>,
}

impl SourceDescriptor {
    /// Classify an address: any integer is a USB index (`-1` selects the
    /// first available device), anything else is a network stream.
    pub fn parse(address: &str) -> Result<Self, VisionError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(VisionError::Config("camera source is empty".to_string()));
        }

        if let Ok(index) = address.parse::<i32>() {
            return Ok(Self::usb(index));
        }

        let lower = address.to_ascii_lowercase();
        let scheme = if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            StreamScheme::Rtsp
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            StreamScheme::Http
        } else {
            StreamScheme::Other
        };

        Ok(Self {
            address: address.to_string(),
            kind: SourceKind::NetworkStream(scheme),
            index: None,
        })
    }

    pub fn usb(index: i32) -> Self {
        Self {
            address: index.to_string(),
            kind: SourceKind::Usb,
            index: Some(index),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn index(&self) -> Option<i32> {
        self.index
    }

    pub fn is_usb(&self) -> bool {
        self.kind == SourceKind::Usb
    }

    pub fn is_synthetic(&self) -> bool {
        self.address.starts_with(SYNTHETIC_SCHEME)
    }

    /// `USB`, `RTSP` or `HTTP`; unknown schemes report as `RTSP`.
    pub fn type_label(&self) -> &'static str {
        match self.kind {
            SourceKind::Usb => "USB",
            SourceKind::NetworkStream(StreamScheme::Http) => "HTTP",
            SourceKind::NetworkStream(_) => "RTSP",
        }
    }

    /// Address shortened for log lines.
    pub fn display_address(&self) -> String {
        match self.kind {
            SourceKind::Usb => format!("USB Camera {}", self.address),
            SourceKind::NetworkStream(_) => {
                if self.address.chars().count() > MAX_LOGGED_ADDRESS {
                    let head: String = self.address.chars().take(MAX_LOGGED_ADDRESS).collect();
                    format!("{}: {}...", self.type_label(), head)
                } else {
                    format!("{}: {}", self.type_label(), self.address)
                }
            }
        }
    }
}

/// Preferred capture parameters; only applied to USB devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// Result of one backend read.
#[derive(Debug)]
pub enum CaptureRead {
    Frame(Frame),
    EndOfStream,
    Failed(String),
}

/// An open decode handle.
pub trait CaptureHandle: Send {
    fn read(&mut self) -> CaptureRead;

    /// Seek back to the first frame. Returns false when unsupported.
    fn rewind(&mut self) -> bool;

    /// Negotiated (width, height, fps) as reported by the device.
    fn negotiated(&self) -> (u32, u32, f64);

    fn release(&mut self);
}

/// Factory for capture handles.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(
        &self,
        source: &SourceDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, VisionError>;
}

/// The capture backend compiled into this build.
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(OpenCvBackend::new())
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(SyntheticBackend::new(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Closed,
    Open,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub is_opened: bool,
    pub state: SourceState,
    pub source: String,
    pub source_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One capture handle and its lifecycle.
pub struct VideoSource {
    descriptor: SourceDescriptor,
    settings: CaptureSettings,
    backend: Arc<dyn CaptureBackend>,
    handle: Option<Box<dyn CaptureHandle>>,
    state: SourceState,
}

impl VideoSource {
    pub fn new(
        descriptor: SourceDescriptor,
        settings: CaptureSettings,
        backend: Arc<dyn CaptureBackend>,
    ) -> Self {
        Self {
            descriptor,
            settings,
            backend,
            handle: None,
            state: SourceState::Closed,
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SourceState::Open
    }

    /// Establish the capture handle. Opening an open source is a no-op.
    pub fn open(&mut self) -> Result<(), VisionError> {
        if self.is_open() {
            return Ok(());
        }

        match self.backend.open(&self.descriptor, &self.settings) {
            Ok(handle) => {
                let (width, height, fps) = handle.negotiated();
                if !self.descriptor.is_usb() {
                    info!(
                        "{} stream opened - using native resolution/fps",
                        self.descriptor.type_label()
                    );
                }
                info!(
                    "{} opened: {}x{} @ {:.0}fps ({})",
                    self.descriptor.display_address(),
                    width,
                    height,
                    fps,
                    self.backend.name()
                );
                self.handle = Some(handle);
                self.state = SourceState::Open;
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to open {}: {}",
                    self.descriptor.display_address(),
                    e
                );
                self.state = SourceState::Failed;
                Err(e)
            }
        }
    }

    /// Read the next frame. Network streams get exactly one
    /// rewind-and-retry on end of stream.
    pub fn read(&mut self) -> Result<Frame, ReadError> {
        if self.state != SourceState::Open {
            return Err(ReadError::NotOpen);
        }
        let handle = self.handle.as_mut().ok_or(ReadError::NotOpen)?;

        match handle.read() {
            CaptureRead::Frame(frame) => Ok(frame),
            CaptureRead::Failed(reason) => {
                warn!("Failed to read frame from camera: {}", reason);
                Err(ReadError::ReadFailed(reason))
            }
            CaptureRead::EndOfStream => match self.descriptor.kind {
                SourceKind::Usb => {
                    debug!("No frame from {}", self.descriptor.display_address());
                    Err(ReadError::NoFrame)
                }
                SourceKind::NetworkStream(_) => {
                    info!("Video ended, looping back to start");
                    if !handle.rewind() {
                        return Err(ReadError::ReadFailed("rewind not supported".to_string()));
                    }
                    match handle.read() {
                        CaptureRead::Frame(frame) => Ok(frame),
                        CaptureRead::EndOfStream => {
                            warn!("Failed to read frame after rewind");
                            Err(ReadError::ReadFailed("no frame after rewind".to_string()))
                        }
                        CaptureRead::Failed(reason) => {
                            warn!("Failed to read frame after rewind: {}", reason);
                            Err(ReadError::ReadFailed(reason))
                        }
                    }
                }
            },
        }
    }

    /// Release the handle. Closing a closed source does nothing.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
            info!("Camera closed: {}", self.descriptor.display_address());
        }
        self.state = SourceState::Closed;
    }

    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            is_opened: self.is_open(),
            state: self.state,
            source: self.descriptor.address().to_string(),
            source_type: self.descriptor.type_label(),
            width: self.settings.width,
            height: self.settings.height,
            fps: self.settings.fps,
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }
}

/// USB indices in `0..max_index` that the backend can open.
pub fn probe_usb(backend: &dyn CaptureBackend, max_index: u32, settings: &CaptureSettings) -> Vec<u32> {
    let mut available = Vec::new();
    for index in 0..max_index {
        let descriptor = SourceDescriptor::usb(index as i32);
        if let Ok(mut handle) = backend.open(&descriptor, settings) {
            handle.release();
            available.push(index);
        }
    }
    debug!("USB probe found {} device(s)", available.len());
    available
}
