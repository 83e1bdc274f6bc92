//! Configuration for lookout-eye
//!
//! Every threshold the perception pipeline uses lives here with its product
//! default. Sections carry `#[serde(default)]` so partial files only override
//! what they name.

use crate::error::VisionError;
use lookout_core::store::{load_json, save_json};
use lookout_core::{keys, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tracker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track
    pub iou_threshold: f32,
    /// Updates without a match after which a track is evicted
    pub max_age: u32,
    /// Maximum number of centroids kept per track
    pub trail_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.4,
            max_age: 15,
            trail_len: 18,
        }
    }
}

/// Motion analyzer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Downsampled grid width
    pub grid_width: u32,
    /// Downsampled grid height
    pub grid_height: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            grid_width: 96,
            grid_height: 54,
        }
    }
}

/// Novelty detection and memory ledger tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoveltyConfig {
    /// Cosine similarity below which a signature counts as new
    pub similarity_threshold: f32,
    /// Side length of the colour sample taken from each box
    pub signature_size: u32,
    /// Signatures remembered per label
    pub bank_size: usize,
    /// Novelty events kept in the persistent ledger
    pub history_len: usize,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            signature_size: 4,
            bank_size: 32,
            history_len: 200,
        }
    }
}

/// Face identity tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Enable the face stage when an embedder is supplied
    pub enabled: bool,
    /// Maximum Euclidean distance for a match
    pub match_threshold: f32,
    /// Embeddings kept per person
    pub max_embeddings: usize,
    /// Seconds before the same unknown face may be asked about again
    pub prompt_cooldown_secs: u64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            match_threshold: 0.55,
            max_embeddings: 20,
            prompt_cooldown_secs: 90,
        }
    }
}

impl FaceConfig {
    pub fn prompt_cooldown(&self) -> Duration {
        Duration::from_secs(self.prompt_cooldown_secs)
    }
}

/// Fusion loop cadence and filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Target cycles per second
    pub target_fps: u32,
    /// Detections below this score are dropped before tracking
    pub min_confidence: f32,
    /// Dominant zone intensity above which a motion insight is emitted
    pub motion_threshold: f32,
    /// Upper bound passed to the detection source
    pub max_results: usize,
    /// Budget for a single detection call
    pub detect_timeout_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            target_fps: 6,
            min_confidence: 0.30,
            motion_threshold: 0.10,
            max_results: 20,
            detect_timeout_ms: 1000,
        }
    }
}

impl FusionConfig {
    pub fn frame_interval(&self) -> Duration {
        let fps = self.target_fps.max(1);
        Duration::from_secs_f64(1.0 / fps as f64)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }
}

/// Sense heuristic tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenseConfig {
    /// Minimum OCR length before the code rule applies
    pub min_code_chars: usize,
    /// Maximum characters of context built from code
    pub code_context_chars: usize,
    /// Maximum characters of context built from plain text
    pub text_context_chars: usize,
    /// Minimum detection score for the object rule
    pub min_object_score: f32,
    /// Keywords that mark OCR output as code
    pub code_keywords: Vec<String>,
    /// Classes worth mentioning
    pub relevant_classes: Vec<String>,
    /// Relevant classes that trigger surfacing when not already in context
    pub surface_classes: Vec<String>,
}

impl Default for SenseConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            min_code_chars: 20,
            code_context_chars: 100,
            text_context_chars: 50,
            min_object_score: 0.6,
            code_keywords: strings(&[
                "function", "const", "let ", "var ", "class ", "def ", "import ", "return",
                "=>", "fn ", "public ", "#include",
            ]),
            relevant_classes: strings(&[
                "person", "laptop", "cell phone", "book", "cup", "bottle", "keyboard", "mouse",
                "tv", "remote", "scissors", "clock",
            ]),
            surface_classes: strings(&["laptop", "cell phone", "tv"]),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    pub tracker: TrackerConfig,
    pub motion: MotionConfig,
    pub novelty: NoveltyConfig,
    pub faces: FaceConfig,
    pub fusion: FusionConfig,
    pub sense: SenseConfig,
}

fn unit_interval(name: &str, value: f32) -> Result<(), String> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(format!("{} must be within [0, 1] (got {})", name, value));
    }
    Ok(())
}

impl EyeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        unit_interval("tracker.iou_threshold", self.tracker.iou_threshold)?;
        if self.tracker.max_age == 0 {
            return Err("tracker.max_age must be greater than 0".to_string());
        }
        if self.tracker.trail_len == 0 {
            return Err("tracker.trail_len must be greater than 0".to_string());
        }

        if self.motion.grid_width < 3 || self.motion.grid_height == 0 {
            return Err("motion grid must be at least 3x1".to_string());
        }
        if self.motion.grid_width > 1920 || self.motion.grid_height > 1080 {
            return Err("motion grid too large (max 1920x1080)".to_string());
        }

        if !self.novelty.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.novelty.similarity_threshold)
        {
            return Err("novelty.similarity_threshold must be within [-1, 1]".to_string());
        }
        if self.novelty.signature_size == 0 || self.novelty.signature_size > 64 {
            return Err("novelty.signature_size must be between 1 and 64".to_string());
        }
        if self.novelty.bank_size == 0 || self.novelty.history_len == 0 {
            return Err("novelty bank and history sizes must be greater than 0".to_string());
        }

        if !self.faces.match_threshold.is_finite() || self.faces.match_threshold < 0.0 {
            return Err("faces.match_threshold must be a non-negative number".to_string());
        }
        if self.faces.max_embeddings == 0 {
            return Err("faces.max_embeddings must be greater than 0".to_string());
        }

        if self.fusion.target_fps == 0 || self.fusion.target_fps > 120 {
            return Err("fusion.target_fps must be between 1 and 120".to_string());
        }
        unit_interval("fusion.min_confidence", self.fusion.min_confidence)?;
        unit_interval("fusion.motion_threshold", self.fusion.motion_threshold)?;
        if self.fusion.max_results == 0 {
            return Err("fusion.max_results must be greater than 0".to_string());
        }
        if self.fusion.detect_timeout_ms == 0 {
            return Err("fusion.detect_timeout_ms must be greater than 0".to_string());
        }

        unit_interval("sense.min_object_score", self.sense.min_object_score)?;

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(VisionError::Config(format!(
                "Path traversal detected: {:?}",
                path
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a JSON, TOML or YAML string
    pub fn from_str(content: &str) -> Result<Self, VisionError> {
        let config = if content.trim_start().starts_with('{') {
            serde_json::from_str::<EyeConfig>(content)
                .map_err(|e| VisionError::Config(format!("Invalid JSON configuration: {}", e)))?
        } else if let Ok(config) = toml::from_str::<EyeConfig>(content) {
            config
        } else if let Ok(config) = serde_yaml::from_str::<EyeConfig>(content) {
            config
        } else {
            return Err(VisionError::Config("Unknown configuration format".to_string()));
        };

        config.validate().map_err(VisionError::Config)?;
        Ok(config)
    }

    /// Apply `LOOKOUT_*` environment overrides on top of `self`
    pub fn with_env(mut self) -> Self {
        if let Some(fps) = env_parse::<u32>("LOOKOUT_TARGET_FPS") {
            self.fusion.target_fps = fps;
        }
        if let Some(score) = env_parse::<f32>("LOOKOUT_MIN_CONFIDENCE") {
            self.fusion.min_confidence = score;
        }
        if let Some(threshold) = env_parse::<f32>("LOOKOUT_MOTION_THRESHOLD") {
            self.fusion.motion_threshold = threshold;
        }
        if let Some(threshold) = env_parse::<f32>("LOOKOUT_FACE_THRESHOLD") {
            self.faces.match_threshold = threshold;
        }
        self
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load persisted settings, falling back to defaults
    pub fn load_settings(store: &dyn KeyValueStore) -> Result<Self, VisionError> {
        let config: EyeConfig = load_json(store, keys::SETTINGS)?;
        config.validate().map_err(VisionError::Config)?;
        Ok(config)
    }

    /// Persist these settings
    pub fn save_settings(&self, store: &dyn KeyValueStore) -> Result<(), VisionError> {
        self.validate().map_err(VisionError::Config)?;
        save_json(store, keys::SETTINGS, self)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
