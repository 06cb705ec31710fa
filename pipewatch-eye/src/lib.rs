//! pipewatch-eye: video acquisition and defect detection
//!
//! Captures frames from USB devices or network streams, runs them through a
//! detection model and renders annotated copies for streaming.

pub mod annotate;
pub mod config;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod inference;
pub mod nms;
pub mod source;

pub use config::EyeConfig;
pub use encoding::encode_jpeg;
pub use error::{ReadError, VisionError};
pub use frame::Frame;
pub use inference::{
    DetectorBackend, EngineStatus, InferenceEngine, LoaderChain, ModelLoader, RawDetection,
};
pub use source::{
    CaptureBackend, CaptureSettings, SourceDescriptor, SourceKind, SourceStatus, VideoSource,
};
