//! Raw detections and the external detection source seam

use crate::error::VisionError;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
///
/// Serialized as `[x, y, w, h]`, the shape detection models emit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x, y, w, h]: [f32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    pub fn area(&self) -> f32 {
        if !self.is_finite() || self.w < 0.0 || self.h < 0.0 {
            return 0.0;
        }
        self.w * self.h
    }

    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Intersection over Union. Any non-finite or negative dimension yields 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        if !self.is_finite() || !other.is_finite() {
            return 0.0;
        }
        if self.w < 0.0 || self.h < 0.0 || other.w < 0.0 || other.h < 0.0 {
            return 0.0;
        }

        let inter_x_min = self.x.max(other.x);
        let inter_y_min = self.y.max(other.y);
        let inter_x_max = (self.x + self.w).min(other.x + other.w);
        let inter_y_max = (self.y + self.h).min(other.y + other.h);

        if inter_x_max <= inter_x_min || inter_y_max <= inter_y_min {
            return 0.0;
        }

        let inter_area = (inter_x_max - inter_x_min) * (inter_y_max - inter_y_min);
        let union_area = self.area() + other.area() - inter_area;

        if union_area <= 0.0 || !union_area.is_finite() {
            return 0.0;
        }

        let iou = inter_area / union_area;
        if iou.is_finite() && (0.0..=1.0).contains(&iou) {
            iou
        } else {
            0.0
        }
    }

    /// Clamp to a `width` x `height` frame, returning integer pixel bounds
    /// `(x, y, w, h)` or `None` when nothing of the box is inside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !self.is_finite() || self.w <= 0.0 || self.h <= 0.0 {
            return None;
        }
        let x0 = self.x.max(0.0).floor();
        let y0 = self.y.max(0.0).floor();
        let x1 = (self.x + self.w).min(width as f32).ceil();
        let y1 = (self.y + self.h).min(height as f32).ceil();
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// One observation in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(rename = "class")]
    pub label: String,
    pub score: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            label: label.into(),
            score,
        }
    }
}

/// External object detector. Treated as a black box; may fail per call.
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// Detect at most `max_results` objects in `frame`.
    async fn detect(&self, frame: &RgbImage, max_results: usize)
        -> Result<Vec<Detection>, VisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let b = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        assert!((b.iou(&b) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        let b = BoundingBox::new(200.0, 200.0, 50.0, 50.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_iou_invalid_inputs() {
        let good = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        assert_eq!(BoundingBox::new(f32::NAN, 10.0, 50.0, 50.0).iou(&good), 0.0);
        assert_eq!(good.iou(&BoundingBox::new(10.0, 10.0, -50.0, 50.0)), 0.0);
        assert_eq!(good.iou(&BoundingBox::new(f32::INFINITY, 10.0, 50.0, 50.0)), 0.0);
        assert_eq!(BoundingBox::default().iou(&BoundingBox::default()), 0.0);
    }

    #[test]
    fn test_centroid() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.centroid(), (25.0, 40.0));
    }

    #[test]
    fn test_clamp_to_frame() {
        let b = BoundingBox::new(-5.0, 10.0, 20.0, 100.0);
        assert_eq!(b.clamp_to(64, 48), Some((0, 10, 15, 38)));
        assert_eq!(BoundingBox::new(100.0, 0.0, 5.0, 5.0).clamp_to(64, 48), None);
        assert_eq!(BoundingBox::new(0.0, 0.0, 0.0, 5.0).clamp_to(64, 48), None);
    }

    #[test]
    fn test_detection_wire_format() {
        let json = r#"{"box":[1.0,2.0,3.0,4.0],"class":"cup","score":0.75}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.label, "cup");
        assert_eq!(det.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));

        let value = serde_json::to_value(&det).unwrap();
        assert_eq!(value["class"], "cup");
        assert_eq!(value["box"][2], 3.0);
    }
}
