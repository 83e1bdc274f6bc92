//! Summaries emitted by the fusion loop

use crate::processing::Zone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Insight {
    /// Detections per label in this frame
    Count { counts: BTreeMap<String, usize> },
    /// A label appeared looking unlike anything seen before
    Novel { label: String, confidence: f32 },
    /// Motion concentrated in one zone
    Motion { zone: Zone, intensity: f32 },
}

impl Insight {
    pub fn kind(&self) -> &'static str {
        match self {
            Insight::Count { .. } => "count",
            Insight::Novel { .. } => "novel",
            Insight::Motion { .. } => "motion",
        }
    }
}
