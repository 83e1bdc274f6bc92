//! Perception fusion loop
//!
//! [`PerceptionEngine::run_cycle`] is the whole pipeline for one frame.
//! [`PerceptionLoop`] drives it on a fixed cadence and hands every result to
//! a callback.

use crate::camera::FrameSource;
use crate::config::EyeConfig;
use crate::error::VisionError;
use crate::faces::{EnrollmentPort, FaceObservation, FaceStage, FaceStore};
use crate::insight::Insight;
use crate::memory::MemoryLedger;
use crate::models::{Detection, DetectionSource, FaceEmbedder};
use crate::processing::{MotionAnalyzer, MotionField, NoveltyDetector, ObjectTracker, Track};
use chrono::{DateTime, Utc};
use image::RgbImage;
use lookout_core::KeyValueStore;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything perceived in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionFrame {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub tracks: Vec<Track>,
    pub detections: Vec<Detection>,
    pub insights: Vec<Insight>,
    pub motion: MotionField,
    pub faces: Vec<FaceObservation>,
}

/// Owns every stateful perception stage
pub struct PerceptionEngine {
    config: EyeConfig,
    frames: Arc<dyn FrameSource>,
    detector: Arc<dyn DetectionSource>,
    store: Arc<dyn KeyValueStore>,
    tracker: ObjectTracker,
    motion: MotionAnalyzer,
    novelty: NoveltyDetector,
    ledger: MemoryLedger,
    faces: Option<FaceStage>,
    frame_index: u64,
}

impl PerceptionEngine {
    /// Create a new engine
    pub fn new(
        config: EyeConfig,
        frames: Arc<dyn FrameSource>,
        detector: Arc<dyn DetectionSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, VisionError> {
        config.validate().map_err(VisionError::Config)?;

        Ok(Self {
            tracker: ObjectTracker::new(config.tracker.clone()),
            motion: MotionAnalyzer::new(config.motion.clone()),
            novelty: NoveltyDetector::new(config.novelty.clone()),
            ledger: MemoryLedger::new(store.clone(), config.novelty.history_len),
            faces: None,
            frame_index: 0,
            config,
            frames,
            detector,
            store,
        })
    }

    /// Attach a face embedder. Returns the enrollment port for the UI, or
    /// `None` when faces are disabled in the configuration.
    pub fn enable_faces(&mut self, embedder: Arc<dyn FaceEmbedder>) -> Option<EnrollmentPort> {
        if !self.config.faces.enabled {
            info!("Face stage disabled by configuration");
            return None;
        }
        let store = FaceStore::new(self.store.clone(), self.config.faces.max_embeddings);
        let (stage, port) = FaceStage::new(embedder, store, &self.config.faces);
        self.faces = Some(stage);
        Some(port)
    }

    pub fn config(&self) -> &EyeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn ledger(&mut self) -> &mut MemoryLedger {
        &mut self.ledger
    }

    pub fn face_stage(&self) -> Option<&FaceStage> {
        self.faces.as_ref()
    }

    /// Cycles completed so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Run the pipeline once on the current frame
    pub async fn run_cycle(&mut self) -> Result<PerceptionFrame, VisionError> {
        let fusion = &self.config.fusion;
        let frame = self.frames.capture_frame()?;

        let raw = match tokio::time::timeout(
            fusion.detect_timeout(),
            self.detector.detect(&frame, fusion.max_results),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(VisionError::Timeout(fusion.detect_timeout_ms)),
        };

        let min_confidence = fusion.min_confidence;
        let detections: Vec<Detection> = raw
            .into_iter()
            .filter(|d| d.bbox.is_finite() && d.score.is_finite() && d.score >= min_confidence)
            .take(fusion.max_results)
            .collect();

        let tracks = self.tracker.update(&detections);
        let motion = self.motion.analyze(&frame);

        let mut insights = Vec::new();
        if !detections.is_empty() {
            let mut counts = BTreeMap::new();
            for detection in &detections {
                *counts.entry(detection.label.clone()).or_insert(0usize) += 1;
            }
            insights.push(Insight::Count { counts });
        }

        if let Some(novel) = self.observe_new_tracks(&frame, &tracks) {
            insights.push(novel);
        }

        let (zone, intensity) = motion.dominant();
        if intensity > self.config.fusion.motion_threshold {
            insights.push(Insight::Motion { zone, intensity });
        }

        let faces = match self.faces.as_mut() {
            Some(stage) => stage.process(&frame).await,
            None => Vec::new(),
        };

        self.frame_index += 1;
        debug!(
            "Cycle {}: {} detections, {} tracks, {} insights",
            self.frame_index,
            detections.len(),
            tracks.len(),
            insights.len()
        );

        Ok(PerceptionFrame {
            frame_index: self.frame_index,
            timestamp: Utc::now(),
            tracks,
            detections,
            insights,
            motion,
            faces,
        })
    }

    /// Ledger bookkeeping for tracks born this cycle; returns the most
    /// confident novel sighting, if any.
    fn observe_new_tracks(&mut self, frame: &RgbImage, tracks: &[Track]) -> Option<Insight> {
        let mut best: Option<(String, f32)> = None;

        for track in tracks.iter().filter(|t| t.is_new()) {
            let label = track.label();
            if let Err(e) = self.ledger.bump(label) {
                warn!("Failed to update memory for '{}': {}", label, e);
            }

            let signature = self.novelty.signature(frame, track.bbox());
            if !self.novelty.observe(label, &signature) {
                continue;
            }

            let confidence = track.object.score;
            if let Err(e) = self.ledger.record_novel(label, confidence) {
                warn!("Failed to record novel '{}': {}", label, e);
            }
            if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
                best = Some((label.to_string(), confidence));
            }
        }

        best.map(|(label, confidence)| Insight::Novel { label, confidence })
    }
}

impl std::fmt::Debug for PerceptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptionEngine")
            .field("frame_index", &self.frame_index)
            .field("tracks", &self.tracker.len())
            .field("faces", &self.faces.is_some())
            .finish()
    }
}

/// Background task running [`PerceptionEngine::run_cycle`] at the configured
/// frame rate
pub struct PerceptionLoop {
    running: Arc<ReentrantMutex<Cell<bool>>>,
    handle: Option<JoinHandle<PerceptionEngine>>,
}

impl PerceptionLoop {
    /// Start the loop on the current tokio runtime.
    ///
    /// `on_frame` runs under the loop's running lock. The lock is
    /// re-entrant, so the callback may call [`stop`](Self::stop) itself.
    pub fn start<F>(mut engine: PerceptionEngine, mut on_frame: F) -> Self
    where
        F: FnMut(PerceptionFrame) + Send + 'static,
    {
        let running = Arc::new(ReentrantMutex::new(Cell::new(true)));
        let flag = running.clone();
        let period = engine.config().fusion.frame_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Perception loop started ({:?} per frame)", period);

            loop {
                ticker.tick().await;
                if !flag.lock().get() {
                    break;
                }

                match engine.run_cycle().await {
                    Ok(frame) => {
                        if !deliver(&flag, frame, &mut on_frame) {
                            break;
                        }
                    }
                    Err(e) => warn!("Perception cycle skipped: {}", e),
                }
            }

            info!("Perception loop stopped after {} frames", engine.frame_index());
            engine
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Stop the loop. No frame is delivered after this returns.
    pub fn stop(&self) {
        let running = self.running.lock();
        if running.get() {
            running.set(false);
            debug!("Perception loop stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().get() && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the loop and wait for the engine to be handed back
    pub async fn shutdown(mut self) -> Option<PerceptionEngine> {
        self.stop();
        let handle = self.handle.take()?;
        match handle.await {
            Ok(engine) => Some(engine),
            Err(e) => {
                error!("Perception loop task failed: {}", e);
                None
            }
        }
    }
}

impl Drop for PerceptionLoop {
    fn drop(&mut self) {
        self.running.lock().set(false);
    }
}

/// Hand `frame` to the callback unless the loop was stopped meanwhile
fn deliver<F>(
    flag: &ReentrantMutex<Cell<bool>>,
    frame: PerceptionFrame,
    on_frame: &mut F,
) -> bool
where
    F: FnMut(PerceptionFrame),
{
    let running = flag.lock();
    if !running.get() {
        return false;
    }
    on_frame(frame);
    running.get()
}
