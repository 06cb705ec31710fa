//! OpenCV-backed capture for USB devices and stream URLs

use super::{
    CaptureBackend, CaptureHandle, CaptureRead, CaptureSettings, SourceDescriptor,
    SyntheticBackend,
};
use crate::error::VisionError;
use crate::frame::Frame;
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH,
        CAP_PROP_POS_FRAMES,
    },
};
use tracing::warn;

/// Capture backend over `cv::VideoCapture`. `stub://` addresses are served
/// by the synthetic backend.
#[derive(Debug, Default)]
pub struct OpenCvBackend {
    synthetic: SyntheticBackend,
}

impl OpenCvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for OpenCvBackend {
    fn name(&self) -> &'static str {
        "opencv"
    }

    fn open(
        &self,
        source: &SourceDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, VisionError> {
        if source.is_synthetic() {
            return self.synthetic.open(source, settings);
        }

        let open_err = |reason: String| VisionError::SourceOpen {
            source_address: source.address().to_string(),
            reason,
        };

        let mut capture = match source.index() {
            Some(index) => VideoCapture::new(index, CAP_ANY),
            None => VideoCapture::from_file(source.address(), CAP_ANY),
        }
        .map_err(|e| open_err(e.message))?;

        if !capture.is_opened().map_err(|e| open_err(e.message))? {
            return Err(open_err("capture did not open".to_string()));
        }

        if source.is_usb() {
            // Devices may ignore these; the negotiated values are read back below.
            for (prop, value) in [
                (CAP_PROP_FRAME_WIDTH, settings.width as f64),
                (CAP_PROP_FRAME_HEIGHT, settings.height as f64),
                (CAP_PROP_FPS, settings.fps as f64),
            ] {
                if let Err(e) = capture.set(prop, value) {
                    warn!("Failed to set capture property {}: {}", prop, e.message);
                }
            }
        }

        let width = capture.get(CAP_PROP_FRAME_WIDTH).unwrap_or(0.0) as u32;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0) as u32;
        let fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);

        Ok(Box::new(OpenCvHandle {
            capture,
            width,
            height,
            fps,
        }))
    }
}

struct OpenCvHandle {
    capture: VideoCapture,
    width: u32,
    height: u32,
    fps: f64,
}

impl OpenCvHandle {
    fn to_rgb(&self, bgr: &Mat) -> Result<RgbImage, VisionError> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let (cols, rows) = (rgb.cols() as u32, rgb.rows() as u32);
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(cols, rows, bytes)
            .ok_or_else(|| VisionError::Camera("frame buffer size mismatch".to_string()))
    }
}

impl CaptureHandle for OpenCvHandle {
    fn read(&mut self) -> CaptureRead {
        let mut mat = Mat::default();
        match self.capture.read(&mut mat) {
            Ok(true) if !mat.empty() => match self.to_rgb(&mat) {
                Ok(image) => CaptureRead::Frame(Frame::new(image)),
                Err(e) => CaptureRead::Failed(e.to_string()),
            },
            Ok(_) => CaptureRead::EndOfStream,
            Err(e) => CaptureRead::Failed(e.message),
        }
    }

    fn rewind(&mut self) -> bool {
        self.capture.set(CAP_PROP_POS_FRAMES, 0.0).unwrap_or(false)
    }

    fn negotiated(&self) -> (u32, u32, f64) {
        (self.width, self.height, self.fps)
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Failed to release capture: {}", e.message);
        }
    }
}
