//! Tests for VideoSource lifecycle and end-of-stream handling

use image::RgbImage;
use parking_lot::Mutex;
use pipewatch_eye::error::{ReadError, VisionError};
use pipewatch_eye::frame::Frame;
use pipewatch_eye::source::{
    probe_usb, CaptureBackend, CaptureHandle, CaptureRead, CaptureSettings, SourceDescriptor,
    SourceKind, SourceState, StreamScheme, SyntheticBackend, VideoSource,
};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    opens: usize,
    reads: usize,
    rewinds: usize,
    releases: usize,
}

/// Backend whose handles replay a script of read outcomes.
struct ScriptedBackend {
    script: Vec<&'static str>,
    fail_open: bool,
    counters: Arc<Mutex<Counters>>,
}

impl ScriptedBackend {
    fn new(script: Vec<&'static str>) -> (Arc<Self>, Arc<Mutex<Counters>>) {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let backend = Arc::new(Self {
            script,
            fail_open: false,
            counters: counters.clone(),
        });
        (backend, counters)
    }
}

struct ScriptedHandle {
    script: VecDeque<&'static str>,
    counters: Arc<Mutex<Counters>>,
}

impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(
        &self,
        source: &SourceDescriptor,
        _settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, VisionError> {
        self.counters.lock().opens += 1;
        if self.fail_open {
            return Err(VisionError::SourceOpen {
                source_address: source.address().to_string(),
                reason: "unreachable".to_string(),
            });
        }
        Ok(Box::new(ScriptedHandle {
            script: self.script.iter().copied().collect(),
            counters: self.counters.clone(),
        }))
    }
}

impl CaptureHandle for ScriptedHandle {
    fn read(&mut self) -> CaptureRead {
        self.counters.lock().reads += 1;
        match self.script.pop_front() {
            Some("frame") => CaptureRead::Frame(Frame::new(RgbImage::new(4, 4))),
            Some("fail") => CaptureRead::Failed("decoder error".to_string()),
            _ => CaptureRead::EndOfStream,
        }
    }

    fn rewind(&mut self) -> bool {
        self.counters.lock().rewinds += 1;
        true
    }

    fn negotiated(&self) -> (u32, u32, f64) {
        (4, 4, 30.0)
    }

    fn release(&mut self) {
        self.counters.lock().releases += 1;
    }
}

fn source(address: &str, backend: Arc<dyn CaptureBackend>) -> VideoSource {
    VideoSource::new(
        SourceDescriptor::parse(address).unwrap(),
        CaptureSettings::default(),
        backend,
    )
}

#[test]
fn test_classification() {
    let usb = SourceDescriptor::parse("0").unwrap();
    assert_eq!(usb.kind(), SourceKind::Usb);
    assert_eq!(usb.index(), Some(0));
    assert_eq!(SourceDescriptor::parse("-1").unwrap().kind(), SourceKind::Usb);

    assert_eq!(
        SourceDescriptor::parse("rtsp://host/x").unwrap().kind(),
        SourceKind::NetworkStream(StreamScheme::Rtsp)
    );
    assert_eq!(
        SourceDescriptor::parse("http://host/x.mp4").unwrap().kind(),
        SourceKind::NetworkStream(StreamScheme::Http)
    );
    assert_eq!(
        SourceDescriptor::parse("abc").unwrap().kind(),
        SourceKind::NetworkStream(StreamScheme::Other)
    );
}

#[test]
fn test_network_stream_rewinds_exactly_once() {
    // Read 1 hits end of stream, the single retry also hits end of stream.
    let (backend, counters) = ScriptedBackend::new(vec!["eos", "eos", "frame"]);
    let mut src = source("http://host/clip.mp4", backend);
    src.open().unwrap();

    assert!(matches!(src.read(), Err(ReadError::ReadFailed(_))));
    let c = counters.lock();
    assert_eq!(c.rewinds, 1);
    assert_eq!(c.reads, 2);
}

#[test]
fn test_network_stream_rewind_recovers() {
    let (backend, counters) = ScriptedBackend::new(vec!["frame", "eos", "frame"]);
    let mut src = source("rtsp://cam/stream", backend);
    src.open().unwrap();

    assert!(src.read().is_ok());
    assert!(src.read().is_ok());
    assert_eq!(counters.lock().rewinds, 1);
}

#[test]
fn test_usb_end_of_stream_does_not_rewind() {
    let (backend, counters) = ScriptedBackend::new(vec!["eos"]);
    let mut src = source("1", backend);
    src.open().unwrap();

    assert_eq!(src.read().unwrap_err(), ReadError::NoFrame);
    assert_eq!(counters.lock().rewinds, 0);
}

#[test]
fn test_hard_failure_is_not_retried() {
    let (backend, counters) = ScriptedBackend::new(vec!["fail", "frame"]);
    let mut src = source("rtsp://cam/stream", backend);
    src.open().unwrap();

    assert!(matches!(src.read(), Err(ReadError::ReadFailed(_))));
    assert_eq!(counters.lock().rewinds, 0);
    assert_eq!(counters.lock().reads, 1);
}

#[test]
fn test_read_before_open() {
    let (backend, _) = ScriptedBackend::new(vec!["frame"]);
    let mut src = source("0", backend);
    assert_eq!(src.read().unwrap_err(), ReadError::NotOpen);
}

#[test]
fn test_close_is_idempotent() {
    let (backend, counters) = ScriptedBackend::new(vec!["frame", "frame"]);
    let mut src = source("0", backend);

    // Never opened
    src.close();
    assert_eq!(src.state(), SourceState::Closed);

    src.open().unwrap();
    src.close();
    src.close();
    assert_eq!(src.state(), SourceState::Closed);
    assert_eq!(counters.lock().releases, 1);
    assert_eq!(src.read().unwrap_err(), ReadError::NotOpen);
    assert_eq!(counters.lock().opens, 1);
}

#[test]
fn test_open_failure_then_recovery() {
    let counters = Arc::new(Mutex::new(Counters::default()));
    let failing = Arc::new(ScriptedBackend {
        script: vec![],
        fail_open: true,
        counters: counters.clone(),
    });
    let mut src = source("rtsp://down", failing);
    assert!(src.open().is_err());
    assert_eq!(src.state(), SourceState::Failed);
    assert!(!src.status().is_opened);

    let mut src = source("stub://back?frames=1", Arc::new(SyntheticBackend::default()));
    src.open().unwrap();
    assert_eq!(src.state(), SourceState::Open);
}

#[test]
fn test_open_twice_is_noop() {
    let (backend, counters) = ScriptedBackend::new(vec!["frame"]);
    let mut src = source("0", backend);
    src.open().unwrap();
    src.open().unwrap();
    assert_eq!(counters.lock().opens, 1);
}

#[test]
fn test_synthetic_finite_stream_loops() {
    let mut src = source("stub://clip?frames=2", Arc::new(SyntheticBackend::default()));
    src.open().unwrap();
    for _ in 0..5 {
        assert!(src.read().is_ok());
    }
}

#[test]
fn test_status_reports_type() {
    let src = source("https://host/v.mp4", Arc::new(SyntheticBackend::default()));
    let status = src.status();
    assert_eq!(status.source_type, "HTTP");
    assert_eq!(status.source, "https://host/v.mp4");
    assert!(!status.is_opened);
}

#[test]
fn test_probe_usb() {
    let backend = SyntheticBackend::new(2);
    assert_eq!(probe_usb(&backend, 5, &CaptureSettings::default()), vec![0, 1]);
    assert!(probe_usb(&backend, 0, &CaptureSettings::default()).is_empty());
}
