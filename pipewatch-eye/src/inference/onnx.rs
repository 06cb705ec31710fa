//! YOLOv8 ONNX detector

use super::{DetectorBackend, ModelLoader, RawDetection};
use crate::error::VisionError;
use crate::frame::Frame;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;
use pipewatch_core::BoundingBox;
use tracing::{debug, info};

/// COCO class names, used when the configured class list is shorter than
/// the model's output.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

const INPUT_SIZE: u32 = 640;

pub struct OnnxLoader {
    class_names: Vec<String>,
    score_floor: f64,
}

impl OnnxLoader {
    /// `score_floor` drops candidates before they leave the backend.
    pub fn new(class_names: Vec<String>, score_floor: f64) -> Self {
        Self {
            class_names,
            score_floor,
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn supports(&self, model_path: &str) -> bool {
        model_path.to_ascii_lowercase().ends_with(".onnx")
    }

    fn load(&self, model_path: &str) -> Result<Box<dyn DetectorBackend>, VisionError> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| VisionError::Model(format!("Failed to load YOLO model {}: {}", model_path, e)))?;
        info!("YOLO model loaded from {}", model_path);

        Ok(Box::new(YoloOnnxBackend {
            session,
            class_names: self.class_names.clone(),
            score_floor: self.score_floor as f32,
        }))
    }
}

pub struct YoloOnnxBackend {
    session: Session,
    class_names: Vec<String>,
    score_floor: f32,
}

fn class_name(class_names: &[String], class_id: usize) -> String {
    class_names
        .get(class_id)
        .cloned()
        .or_else(|| COCO_CLASSES.get(class_id).map(|s| s.to_string()))
        .unwrap_or_else(|| format!("class_{}", class_id))
}

impl YoloOnnxBackend {
    /// Resize to the model input and lay out as normalized CHW.
    fn preprocess(frame: &Frame) -> Vec<f32> {
        let resized = imageops::resize(&frame.image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            data[i] = pixel[0] as f32 / 255.0;
            data[plane + i] = pixel[1] as f32 / 255.0;
            data[2 * plane + i] = pixel[2] as f32 / 255.0;
        }
        data
    }
}

impl DetectorBackend for YoloOnnxBackend {
    fn name(&self) -> &'static str {
        "yolo-onnx"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, VisionError> {
        let size = INPUT_SIZE as usize;
        let input = Tensor::from_array(([1usize, 3, size, size], Self::preprocess(frame)))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, values) = outputs[0].try_extract_tensor::<f32>()?;

        // [1, 4 + classes, anchors]
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(VisionError::Inference(format!("unexpected output shape {:?}", shape)));
        }
        let attrs = shape[1] as usize;
        let anchors = shape[2] as usize;
        let classes = attrs - 4;

        let scale_x = frame.width() as f32 / INPUT_SIZE as f32;
        let scale_y = frame.height() as f32 / INPUT_SIZE as f32;
        let at = |row: usize, col: usize| values[row * anchors + col];

        let mut out = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (0..classes)
                .map(|c| (c, at(4 + c, a)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < self.score_floor {
                continue;
            }

            let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
            let x1 = ((cx - w / 2.0) * scale_x).max(0.0);
            let y1 = ((cy - h / 2.0) * scale_y).max(0.0);
            let x2 = ((cx + w / 2.0) * scale_x).min(frame.width() as f32);
            let y2 = ((cy + h / 2.0) * scale_y).min(frame.height() as f32);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            out.push(RawDetection::new(
                class_name(&self.class_names, class_id),
                score as f64,
                BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
            ));
        }

        debug!("YOLO produced {} candidates", out.len());
        Ok(out)
    }
}
