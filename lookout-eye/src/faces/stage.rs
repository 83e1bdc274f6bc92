//! Per-frame face stage
//!
//! Embeds faces, matches them against the [`FaceStore`], and asks the UI to
//! name unknown faces through an [`EnrollmentPort`].

use crate::config::FaceConfig;
use crate::error::VisionError;
use crate::faces::gate::{face_signature, EnrollmentGate};
use crate::faces::store::FaceStore;
use crate::models::{BoundingBox, FaceEmbedder};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ENROLLMENT_BUFFER: usize = 16;

/// Ask the user to name an unknown face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub signature: String,
    pub descriptor: Vec<f32>,
}

/// The user's reply; `None` means they declined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentAnswer {
    pub signature: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FaceIdentity {
    Known { name: String, distance: f32 },
    Unknown { signature: String, descriptor: Vec<f32> },
}

/// A face found in the current frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub identity: FaceIdentity,
}

impl FaceObservation {
    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            FaceIdentity::Known { name, .. } => Some(name),
            FaceIdentity::Unknown { .. } => None,
        }
    }
}

/// UI side of the enrollment conversation
#[derive(Debug)]
pub struct EnrollmentPort {
    requests: mpsc::Receiver<EnrollmentRequest>,
    answers: mpsc::Sender<EnrollmentAnswer>,
}

impl EnrollmentPort {
    /// Wait for the next prompt. `None` once the face stage is gone.
    pub async fn next_request(&mut self) -> Option<EnrollmentRequest> {
        self.requests.recv().await
    }

    /// Non-blocking variant of [`next_request`](Self::next_request)
    pub fn try_next_request(&mut self) -> Option<EnrollmentRequest> {
        self.requests.try_recv().ok()
    }

    /// Answer a prompt. Applied at the start of the next cycle.
    pub fn answer(&self, signature: &str, name: Option<String>) -> Result<(), VisionError> {
        self.answers
            .try_send(EnrollmentAnswer {
                signature: signature.to_string(),
                name,
            })
            .map_err(|e| VisionError::Processing(format!("Enrollment answer not delivered: {}", e)))
    }
}

pub struct FaceStage {
    embedder: Arc<dyn FaceEmbedder>,
    store: FaceStore,
    gate: EnrollmentGate,
    match_threshold: f32,
    pending: HashMap<String, Vec<f32>>,
    requests: mpsc::Sender<EnrollmentRequest>,
    answers: mpsc::Receiver<EnrollmentAnswer>,
}

impl FaceStage {
    pub fn new(
        embedder: Arc<dyn FaceEmbedder>,
        store: FaceStore,
        config: &FaceConfig,
    ) -> (Self, EnrollmentPort) {
        let (request_tx, request_rx) = mpsc::channel(ENROLLMENT_BUFFER);
        let (answer_tx, answer_rx) = mpsc::channel(ENROLLMENT_BUFFER);

        let stage = Self {
            embedder,
            store,
            gate: EnrollmentGate::new(config.prompt_cooldown()),
            match_threshold: config.match_threshold,
            pending: HashMap::new(),
            requests: request_tx,
            answers: answer_rx,
        };
        let port = EnrollmentPort {
            requests: request_rx,
            answers: answer_tx,
        };
        (stage, port)
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    pub fn gate(&self) -> &EnrollmentGate {
        &self.gate
    }

    /// Apply every enrollment answer received since the last cycle
    pub fn drain_answers(&mut self) {
        while let Ok(answer) = self.answers.try_recv() {
            let descriptor = self.pending.remove(&answer.signature);
            let name = answer
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty());

            match (name, descriptor) {
                (Some(name), Some(descriptor)) => match self.store.upsert(name, &descriptor) {
                    Ok(_) => {
                        info!("Face {} enrolled as '{}'", answer.signature, name);
                        self.gate.resolve(&answer.signature);
                    }
                    Err(e) => {
                        warn!("Failed to enroll face {}: {}", answer.signature, e);
                        self.gate.dismiss(&answer.signature);
                    }
                },
                (Some(_), None) => {
                    warn!("Enrollment answer for unknown prompt {}", answer.signature);
                    self.gate.dismiss(&answer.signature);
                }
                (None, _) => {
                    debug!("Enrollment for {} declined", answer.signature);
                    self.gate.dismiss(&answer.signature);
                }
            }
        }
    }

    /// Identify every face in `frame`.
    ///
    /// Embedder failures are logged and yield no faces for this frame.
    pub async fn process(&mut self, frame: &RgbImage) -> Vec<FaceObservation> {
        self.drain_answers();

        let samples = match self.embedder.embed(frame).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Face embedding failed: {}", e);
                return Vec::new();
            }
        };

        let mut observations = Vec::with_capacity(samples.len());
        for sample in samples {
            if sample.embedding.is_empty() || sample.embedding.iter().any(|v| !v.is_finite()) {
                debug!("Skipping face with invalid embedding");
                continue;
            }

            let identity = match self.store.match_embedding(&sample.embedding, self.match_threshold) {
                Ok(Some(found)) => {
                    if let Err(e) = self.store.upsert(&found.name, &sample.embedding) {
                        warn!("Failed to update face '{}': {}", found.name, e);
                    }
                    FaceIdentity::Known {
                        name: found.name,
                        distance: found.distance,
                    }
                }
                Ok(None) => self.unknown(sample.embedding),
                Err(e) => {
                    warn!("Face lookup failed: {}", e);
                    self.unknown(sample.embedding)
                }
            };

            observations.push(FaceObservation {
                bbox: sample.bbox,
                identity,
            });
        }
        observations
    }

    fn unknown(&mut self, descriptor: Vec<f32>) -> FaceIdentity {
        let signature = face_signature(&descriptor);

        if self.gate.should_prompt(&signature, Instant::now()) {
            let request = EnrollmentRequest {
                signature: signature.clone(),
                descriptor: descriptor.clone(),
            };
            match self.requests.try_send(request) {
                Ok(()) => {
                    self.pending.insert(signature.clone(), descriptor.clone());
                }
                Err(e) => {
                    warn!("Enrollment prompt not delivered: {}", e);
                    self.gate.dismiss(&signature);
                }
            }
        }

        FaceIdentity::Unknown {
            signature,
            descriptor,
        }
    }
}

impl std::fmt::Debug for FaceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceStage")
            .field("match_threshold", &self.match_threshold)
            .field("pending", &self.pending.len())
            .field("gate", &self.gate)
            .finish()
    }
}
