//! lookout-eye: perception tracking and fusion for the Lookout assistant
//!
//! Raw detections from an external model are associated across frames into
//! persistent tracks, fused with a motion heatmap, appearance novelty and face
//! identity, and summarized into a small stream of insights.
//!
//! The models themselves are outside this crate. They plug in through
//! [`DetectionSource`], [`FaceEmbedder`] and [`FrameSource`].

pub mod camera;
pub mod config;
pub mod error;
pub mod faces;
pub mod fusion;
pub mod insight;
pub mod memory;
pub mod models;
pub mod processing;
pub mod sense;

pub use camera::{FrameSource, SharedFrame};
pub use config::EyeConfig;
pub use error::VisionError;
pub use faces::{EnrollmentPort, FaceIdentity, FaceObservation, FaceStore};
pub use fusion::{PerceptionEngine, PerceptionFrame, PerceptionLoop};
pub use insight::Insight;
pub use memory::{LedgerSnapshot, MemoryLedger};
pub use models::{BoundingBox, Detection, DetectionSource, FaceEmbedder, FaceSample};
pub use processing::{MotionAnalyzer, MotionField, NoveltyDetector, ObjectTracker, Track, Zone};
pub use sense::{integrate, SenseInput, SenseOutcome};
