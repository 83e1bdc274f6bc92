//! Face embedding source seam

use crate::error::VisionError;
use crate::models::BoundingBox;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A face located in a frame together with its descriptor vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// External face detector + embedder.
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Return zero or more faces found in `frame`.
    async fn embed(&self, frame: &RgbImage) -> Result<Vec<FaceSample>, VisionError>;
}
