//! Configuration for pipewatch-eye

use crate::source::CaptureSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Defect classes the bundled inspection model is trained on.
pub const DEFAULT_DEFECT_CLASSES: &[&str] = &[
    "foreign_object",
    "crack",
    "rust",
    "corrosion",
    "sediment",
    "leak",
];

/// Vision pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeConfig {
    /// USB index, stream URL, or `stub://` synthetic source
    pub camera_source: String,
    /// Preferred capture resolution (width, height), USB only
    pub resolution: (u32, u32),
    /// Preferred capture frame rate, USB only
    pub frame_rate: u32,
    /// Detection model to load
    pub model_path: PathBuf,
    /// Model used when `model_path` does not exist
    pub fallback_model_path: PathBuf,
    pub confidence_threshold: f64,
    pub iou_threshold: f64,
    /// Class names indexed by model output id
    pub class_names: Vec<String>,
    pub jpeg_quality: u8,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            camera_source: "stub://pipeline".to_string(),
            resolution: (640, 480),
            frame_rate: 30,
            model_path: PathBuf::from("models/pipeline_defects.onnx"),
            fallback_model_path: PathBuf::from("stub://demo"),
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            class_names: DEFAULT_DEFECT_CLASSES.iter().map(|s| s.to_string()).collect(),
            jpeg_quality: 80,
        }
    }
}

impl EyeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.camera_source.trim().is_empty() {
            return Err("Camera source must not be empty".to_string());
        }

        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("Frame rate must be between 1 and 120".to_string());
        }

        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if self.resolution.0 > 7680 || self.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("Confidence threshold must be within [0, 1]".to_string());
        }

        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err("IoU threshold must be within [0, 1]".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.resolution.0,
            height: self.resolution.1,
            fps: self.frame_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EyeConfig::default();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.resolution, (640, 480));
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.45);
        assert_eq!(config.class_names.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_frame_rate() {
        let mut config = EyeConfig::default();
        config.frame_rate = 0;
        assert!(config.validate().is_err());
        config.frame_rate = 121;
        assert!(config.validate().is_err());
        config.frame_rate = 120;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_resolution() {
        let mut config = EyeConfig::default();
        config.resolution = (0, 480);
        assert!(config.validate().is_err());
        config.resolution = (7681, 4320);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_thresholds() {
        let mut config = EyeConfig::default();
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
        config.confidence_threshold = 0.0;
        config.iou_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_source() {
        let mut config = EyeConfig::default();
        config.camera_source = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capture_settings() {
        let settings = EyeConfig::default().capture_settings();
        assert_eq!((settings.width, settings.height, settings.fps), (640, 480, 30));
    }
}
