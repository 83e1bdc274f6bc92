//! Frame acquisition seam
//!
//! Camera acquisition itself happens outside this crate. Whatever owns the
//! device pushes frames into a [`SharedFrame`], and the fusion loop pulls the
//! latest one through [`FrameSource`].

use crate::error::VisionError;
use image::RgbImage;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Anything that can hand out the current frame
pub trait FrameSource: Send + Sync {
    /// Return the most recent frame
    fn capture_frame(&self) -> Result<RgbImage, VisionError>;
}

/// Latest-frame slot shared between a producer and the fusion loop
#[derive(Debug, Clone, Default)]
pub struct SharedFrame {
    latest: Arc<RwLock<Option<RgbImage>>>,
}

impl SharedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn push(&self, frame: RgbImage) {
        debug!("New frame {}x{}", frame.width(), frame.height());
        *self.latest.write() = Some(frame);
    }

    /// Drop the current frame, e.g. when the camera is released
    pub fn clear(&self) {
        *self.latest.write() = None;
    }

    pub fn has_frame(&self) -> bool {
        self.latest.read().is_some()
    }
}

impl FrameSource for SharedFrame {
    fn capture_frame(&self) -> Result<RgbImage, VisionError> {
        self.latest
            .read()
            .as_ref()
            .cloned()
            .ok_or_else(|| VisionError::Camera("No frame available".to_string()))
    }
}
