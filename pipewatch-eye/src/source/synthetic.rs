// Synthetic source (stub://) for tests and demos

use super::{CaptureBackend, CaptureHandle, CaptureRead, CaptureSettings, SourceDescriptor};
use crate::error::VisionError;
use crate::frame::Frame;
use image::{Rgb, RgbImage};
use tracing::info;

pub const SYNTHETIC_SCHEME: &str = "stub://";

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_FPS: f64 = 30.0;

/// Generates a moving test pattern.
///
/// Serves `stub://name[?frames=N]` addresses (finite when `frames` is
/// given) and `usb_devices` virtual USB indices starting at 0.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    usb_devices: u32,
}

impl SyntheticBackend {
    pub fn new(usb_devices: u32) -> Self {
        Self { usb_devices }
    }

    // -1 picks the first device, as OpenCV does
    fn has_device(&self, index: i32) -> bool {
        match index {
            -1 => self.usb_devices > 0,
            i if i >= 0 => (i as u32) < self.usb_devices,
            _ => false,
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(
        &self,
        source: &SourceDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, VisionError> {
        if source.is_synthetic() {
            let (name, total_frames) = parse_stub_address(source.address())?;
            info!("Synthetic stream {} connected", name);
            return Ok(Box::new(SyntheticHandle::new(
                SYNTHETIC_WIDTH,
                SYNTHETIC_HEIGHT,
                SYNTHETIC_FPS,
                total_frames,
            )));
        }

        match source.index() {
            Some(index) if self.has_device(index) => Ok(Box::new(SyntheticHandle::new(
                settings.width,
                settings.height,
                settings.fps as f64,
                None,
            ))),
            _ => Err(VisionError::SourceOpen {
                source_address: source.address().to_string(),
                reason: "no capture backend for this source (build with the opencv feature)"
                    .to_string(),
            }),
        }
    }
}

fn parse_stub_address(address: &str) -> Result<(String, Option<u64>), VisionError> {
    let rest = address.trim_start_matches(SYNTHETIC_SCHEME);
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };
    if name.is_empty() {
        return Err(VisionError::SourceOpen {
            source_address: address.to_string(),
            reason: "synthetic source name is empty".to_string(),
        });
    }

    let mut total_frames = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("frames=") {
                let frames = value.parse::<u64>().map_err(|_| VisionError::SourceOpen {
                    source_address: address.to_string(),
                    reason: format!("invalid frame count {:?}", value),
                })?;
                total_frames = Some(frames);
            }
        }
    }

    Ok((name.to_string(), total_frames))
}

struct SyntheticHandle {
    width: u32,
    height: u32,
    fps: f64,
    total_frames: Option<u64>,
    position: u64,
    released: bool,
}

impl SyntheticHandle {
    fn new(width: u32, height: u32, fps: f64, total_frames: Option<u64>) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps,
            total_frames,
            position: 0,
            released: false,
        }
    }

    fn render(&self) -> RgbImage {
        let shift = (self.position % 256) as u32;
        let bar = ((self.position * 4) % self.width as u64) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= bar && x < bar + 8 {
                Rgb([230, 230, 230])
            } else {
                Rgb([
                    ((x + shift) % 256) as u8,
                    ((y + shift) % 256) as u8,
                    96,
                ])
            }
        })
    }
}

impl CaptureHandle for SyntheticHandle {
    fn read(&mut self) -> CaptureRead {
        if self.released {
            return CaptureRead::Failed("capture released".to_string());
        }
        if let Some(total) = self.total_frames {
            if self.position >= total {
                return CaptureRead::EndOfStream;
            }
        }
        let image = self.render();
        self.position += 1;
        CaptureRead::Frame(Frame::new(image))
    }

    fn rewind(&mut self) -> bool {
        self.position = 0;
        true
    }

    fn negotiated(&self) -> (u32, u32, f64) {
        (self.width, self.height, self.fps)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
