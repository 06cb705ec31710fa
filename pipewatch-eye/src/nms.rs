//! Per-class greedy non-maximum suppression

use crate::inference::RawDetection;
use pipewatch_core::BoundingBox;

/// Intersection over union of two corner-form boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0) as f64;
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0) as f64;
    let inter_area = inter_w * inter_h;
    if inter_area <= 0.0 {
        return 0.0;
    }

    let area_a = a.width() as f64 * a.height() as f64;
    let area_b = b.width() as f64 * b.height() as f64;
    let union_area = area_a + area_b - inter_area;
    if union_area <= 0.0 {
        return 0.0;
    }

    (inter_area / union_area).clamp(0.0, 1.0)
}

/// Keep the highest-confidence box of every same-class cluster whose
/// overlap exceeds `iou_threshold`. Output is ordered by confidence.
pub fn suppress(mut detections: Vec<RawDetection>, iou_threshold: f64) -> Vec<RawDetection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let overlaps_kept = keep.iter().any(|kept| {
            kept.class_name == candidate.class_name
                && iou(&kept.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps_kept {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(class_name: &str, confidence: f64, bbox: (i32, i32, i32, i32)) -> RawDetection {
        RawDetection::new(class_name, confidence, BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3))
    }

    #[test]
    fn test_iou_identical() {
        let b = BoundingBox::new(0, 0, 10, 10);
        assert!((iou(&b, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 15, 10);
        // 50 / 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_suppress_same_class() {
        let kept = suppress(
            vec![raw("crack", 0.6, (1, 1, 11, 11)), raw("crack", 0.8, (0, 0, 10, 10))],
            0.45,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.8);
    }

    #[test]
    fn test_suppress_keeps_other_classes() {
        let kept = suppress(
            vec![raw("crack", 0.8, (0, 0, 10, 10)), raw("rust", 0.6, (0, 0, 10, 10))],
            0.45,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_suppress_threshold_is_strict() {
        let a = raw("crack", 0.9, (0, 0, 10, 10));
        let b = raw("crack", 0.7, (5, 0, 15, 10));
        let threshold = iou(&a.bbox, &b.bbox);
        assert_eq!(suppress(vec![a, b], threshold).len(), 2);
    }
}
