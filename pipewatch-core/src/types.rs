// Detection records shared by the vision pipeline, the history and reports

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in integer pixel coordinates, corners inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }
}

/// One model output: class, confidence, box and capture time.
///
/// Only produced by the inference engine and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Local>,
    /// Position along the inspected pipeline, in meters.
    #[serde(rename = "frame_position")]
    pub position: Option<f64>,
}

impl Detection {
    pub fn new(
        class_name: impl Into<String>,
        confidence: f64,
        bbox: BoundingBox,
        captured_at: DateTime<Local>,
        position: Option<f64>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            captured_at,
            position,
        }
    }
}
