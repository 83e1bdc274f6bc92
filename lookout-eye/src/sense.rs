//! Proactive-comment heuristic
//!
//! Turns what is on screen into a short context string for the assistant and
//! decides whether the assistant should speak up unprompted.

use crate::config::SenseConfig;
use crate::models::Detection;
use serde::{Deserialize, Serialize};

/// Inputs gathered for one decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenseInput {
    pub detections: Vec<Detection>,
    pub ocr_text: Option<String>,
    /// What the user has been talking about recently
    pub user_context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenseOutcome {
    pub vision_context: Option<String>,
    pub should_surface: bool,
}

/// Decide what the assistant should know about the scene
pub fn integrate(input: &SenseInput, config: &SenseConfig) -> SenseOutcome {
    let mut parts: Vec<String> = Vec::new();
    let mut should_surface = false;

    if let Some(text) = input.ocr_text.as_deref().map(str::trim) {
        if text.chars().count() > config.min_code_chars && looks_like_code(text, config) {
            parts.push(truncate_chars(
                &format!("Code on screen: {}", text),
                config.code_context_chars,
            ));
            should_surface = true;
        } else if !text.is_empty() {
            parts.push(truncate_chars(
                &format!("Visible text: {}", text),
                config.text_context_chars,
            ));
        }
    }

    let context = input.user_context.to_lowercase();
    let mut objects: Vec<&str> = Vec::new();
    for detection in &input.detections {
        let label = detection.label.as_str();
        if detection.score.is_nan() || detection.score <= config.min_object_score {
            continue;
        }
        if !config.relevant_classes.iter().any(|c| c == label) {
            continue;
        }
        if objects.contains(&label) {
            continue;
        }
        objects.push(label);

        let triggers = config.surface_classes.iter().any(|c| c == label);
        if triggers && !context.contains(&label.to_lowercase()) {
            should_surface = true;
        }
    }
    if !objects.is_empty() {
        parts.push(format!("Objects: {}", objects.join(", ")));
    }

    SenseOutcome {
        vision_context: if parts.is_empty() {
            None
        } else {
            Some(parts.join(". "))
        },
        should_surface,
    }
}

fn looks_like_code(text: &str, config: &SenseConfig) -> bool {
    config.code_keywords.iter().any(|k| text.contains(k.as_str()))
}

/// Keep at most `max` characters
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
