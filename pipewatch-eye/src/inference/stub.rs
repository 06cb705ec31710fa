// Built-in detectors that need no model file

use super::{DetectorBackend, ModelLoader, RawDetection};
use crate::error::VisionError;
use crate::frame::Frame;
use pipewatch_core::BoundingBox;
use std::collections::VecDeque;

pub const STUB_MODEL_SCHEME: &str = "stub://";

const DEMO_CRACK_PERIOD: u64 = 15;
const DEMO_RUST_PERIOD: u64 = 45;

/// Loads `stub://empty` and `stub://demo`.
#[derive(Debug, Default)]
pub struct StubLoader;

impl ModelLoader for StubLoader {
    fn supports(&self, model_path: &str) -> bool {
        model_path.starts_with(STUB_MODEL_SCHEME)
    }

    fn load(&self, model_path: &str) -> Result<Box<dyn DetectorBackend>, VisionError> {
        match model_path.trim_start_matches(STUB_MODEL_SCHEME) {
            "empty" => Ok(Box::new(StubDetector::Empty)),
            "demo" => Ok(Box::new(StubDetector::Demo { frames_seen: 0 })),
            other => Err(VisionError::Model(format!("unknown stub model {:?}", other))),
        }
    }
}

pub enum StubDetector {
    /// Never detects anything.
    Empty,
    /// Emits a centred crack every 15th frame and a rust patch every 45th.
    Demo { frames_seen: u64 },
}

impl DetectorBackend for StubDetector {
    fn name(&self) -> &'static str {
        match self {
            StubDetector::Empty => "stub-empty",
            StubDetector::Demo { .. } => "stub-demo",
        }
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        let frames_seen = match self {
            StubDetector::Empty => return Ok(Vec::new()),
            StubDetector::Demo { frames_seen } => {
                *frames_seen += 1;
                *frames_seen
            }
        };

        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let mut out = Vec::new();
        if frames_seen % DEMO_CRACK_PERIOD == 0 {
            out.push(RawDetection::new(
                "crack",
                0.82,
                BoundingBox::new(w / 3, h / 3, 2 * w / 3, 2 * h / 3),
            ));
        }
        if frames_seen % DEMO_RUST_PERIOD == 0 {
            out.push(RawDetection::new(
                "rust",
                0.67,
                BoundingBox::new(w / 10, h / 10, w / 4, h / 4),
            ));
        }
        Ok(out)
    }
}

/// Replays a fixed sequence of per-frame outputs, repeating the last one
/// once the script runs out.
pub struct ScriptedDetector {
    script: VecDeque<Result<Vec<RawDetection>, String>>,
    last: Result<Vec<RawDetection>, String>,
}

impl ScriptedDetector {
    pub fn new(batches: Vec<Vec<RawDetection>>) -> Self {
        Self::from_results(batches.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<Vec<RawDetection>, String>>) -> Self {
        Self {
            script: results.into(),
            last: Ok(Vec::new()),
        }
    }

    /// A detector whose every call fails.
    pub fn failing(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            script: VecDeque::new(),
            last: Err(reason),
        }
    }
}

impl DetectorBackend for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone().map_err(VisionError::Inference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_demo_is_periodic() {
        let mut detector = StubLoader.load("stub://demo").unwrap();
        let frame = Frame::new(RgbImage::new(90, 90));
        let counts: Vec<usize> = (0..45).map(|_| detector.infer(&frame).unwrap().len()).collect();
        assert_eq!(counts.iter().filter(|&&n| n > 0).count(), 3);
        assert_eq!(counts[44], 2);
    }

    #[test]
    fn test_empty_never_detects() {
        let mut detector = StubLoader.load("stub://empty").unwrap();
        let frame = Frame::new(RgbImage::new(8, 8));
        assert!(detector.infer(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_scripted_repeats_last() {
        let bbox = BoundingBox::new(0, 0, 1, 1);
        let mut detector = ScriptedDetector::new(vec![vec![], vec![RawDetection::new("leak", 0.9, bbox)]]);
        let frame = Frame::new(RgbImage::new(8, 8));
        assert!(detector.infer(&frame).unwrap().is_empty());
        assert_eq!(detector.infer(&frame).unwrap().len(), 1);
        assert_eq!(detector.infer(&frame).unwrap().len(), 1);
    }

    #[test]
    fn test_failing_detector() {
        let mut detector = ScriptedDetector::failing("boom");
        let frame = Frame::new(RgbImage::new(8, 8));
        assert!(matches!(detector.infer(&frame), Err(VisionError::Inference(_))));
    }
}
