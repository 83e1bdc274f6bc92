//! Appearance novelty
//!
//! A tiny colour sample of each new track is compared against the samples
//! already seen for that label. Anything sufficiently unlike all of them is
//! novel.

use crate::config::NoveltyConfig;
use crate::models::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Per-label signature bank
#[derive(Debug)]
pub struct NoveltyDetector {
    config: NoveltyConfig,
    banks: HashMap<String, VecDeque<Vec<f32>>>,
}

impl NoveltyDetector {
    pub fn new(config: NoveltyConfig) -> Self {
        Self {
            config,
            banks: HashMap::new(),
        }
    }

    /// Colour signature of the region under `bbox`.
    ///
    /// Returns an empty vector when the box does not overlap the frame.
    pub fn signature(&self, frame: &RgbImage, bbox: &BoundingBox) -> Vec<f32> {
        let Some((x, y, w, h)) = bbox.clamp_to(frame.width(), frame.height()) else {
            return Vec::new();
        };

        let side = self.config.signature_size.max(1);
        let patch = imageops::crop_imm(frame, x, y, w, h).to_image();
        let sample = imageops::resize(&patch, side, side, FilterType::Triangle);

        let mut values: Vec<f32> = sample
            .pixels()
            .flat_map(|p| p.0.iter().map(|c| *c as f32 / 255.0))
            .collect();

        let norm = l2_norm(&values);
        if norm > 0.0 {
            for v in values.iter_mut() {
                *v /= norm;
            }
        }
        values
    }

    /// Record `signature` for `label`, returning whether it is novel.
    pub fn observe(&mut self, label: &str, signature: &[f32]) -> bool {
        if signature.is_empty() || l2_norm(signature) == 0.0 {
            return false;
        }

        let bank = self.banks.entry(label.to_string()).or_default();
        let best = bank
            .iter()
            .filter_map(|known| cosine_similarity(known, signature))
            .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))));

        let novel = match best {
            None => true,
            Some(similarity) => similarity < self.config.similarity_threshold,
        };

        if novel {
            bank.push_back(signature.to_vec());
            let cap = self.config.bank_size.max(1);
            while bank.len() > cap {
                bank.pop_front();
            }
            debug!("Novel '{}' (similarity {:?})", label, best);
        }
        novel
    }

    /// Number of signatures remembered for `label`
    pub fn bank_len(&self, label: &str) -> usize {
        self.banks.get(label).map_or(0, |b| b.len())
    }

    pub fn reset(&mut self) {
        self.banks.clear();
    }
}

impl Default for NoveltyDetector {
    fn default() -> Self {
        Self::new(NoveltyConfig::default())
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity, `None` for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Some(dot / denom)
}
