//! Per-frame perception stages

pub mod motion;
pub mod novelty;
pub mod tracker;

pub use motion::{MotionAnalyzer, MotionField, Zone, Zones};
pub use novelty::NoveltyDetector;
pub use tracker::{ObjectTracker, Track};
