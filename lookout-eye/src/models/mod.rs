//! External model interfaces
//!
//! The detector and face embedder are black boxes; only their contracts live
//! here.

pub mod detection;
pub mod face;

pub use detection::{BoundingBox, Detection, DetectionSource};
pub use face::{FaceEmbedder, FaceSample};
