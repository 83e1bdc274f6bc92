//! Enrollment prompt gating
//!
//! Unknown faces should not trigger a stream of "who is this?" prompts. At
//! most one prompt is outstanding, and a given face is not asked about again
//! until its cooldown expires.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Components of the descriptor that feed the signature
const SIGNATURE_COMPONENTS: usize = 16;
/// Hex characters kept from the digest
const SIGNATURE_LEN: usize = 16;

/// Stable key for an unknown face.
///
/// Quantizing to one decimal makes nearby descriptors of the same face
/// collapse onto the same key most of the time.
pub fn face_signature(descriptor: &[f32]) -> String {
    let quantized: Vec<String> = descriptor
        .iter()
        .take(SIGNATURE_COMPONENTS)
        .map(|v| format!("{:.1}", quantize(*v)))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(quantized.join(",").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..SIGNATURE_LEN].to_string()
}

/// Round to one decimal, folding `-0.0` into `0.0`
fn quantize(v: f32) -> f32 {
    let q = (v * 10.0).round() / 10.0;
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

#[derive(Debug)]
pub struct EnrollmentGate {
    cooldown: Duration,
    last_prompt: HashMap<String, Instant>,
    awaiting: Option<String>,
}

impl EnrollmentGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_prompt: HashMap::new(),
            awaiting: None,
        }
    }

    /// Whether to prompt for `signature` now. A `true` answer marks the
    /// prompt as outstanding.
    pub fn should_prompt(&mut self, signature: &str, now: Instant) -> bool {
        if self.awaiting.is_some() {
            return false;
        }
        if let Some(last) = self.last_prompt.get(signature) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_prompt.insert(signature.to_string(), now);
        self.awaiting = Some(signature.to_string());
        debug!("Prompting for face {}", signature);
        true
    }

    /// The face was named; it may be prompted again immediately if it ever
    /// shows up unknown.
    pub fn resolve(&mut self, signature: &str) {
        if self.awaiting.as_deref() == Some(signature) {
            self.awaiting = None;
        }
        self.last_prompt.remove(signature);
    }

    /// The prompt was declined; the cooldown stays in force.
    pub fn dismiss(&mut self, signature: &str) {
        if self.awaiting.as_deref() == Some(signature) {
            self.awaiting = None;
        }
    }

    pub fn awaiting(&self) -> Option<&str> {
        self.awaiting.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_stable_under_small_noise() {
        let a: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let mut b = a.clone();
        b[100] += 5.0;
        // Only the first 16 components matter
        assert_eq!(face_signature(&a), face_signature(&b));
        assert_eq!(face_signature(&a).len(), 16);

        let mut c = a.clone();
        c[0] = 0.9;
        assert_ne!(face_signature(&a), face_signature(&c));
    }

    #[test]
    fn test_signature_near_zero_ignores_sign() {
        assert_eq!(face_signature(&[0.04]), face_signature(&[-0.04]));
        assert_eq!(face_signature(&[0.04, 0.3]), face_signature(&[-0.04, 0.3]));
        assert_ne!(face_signature(&[0.2, 0.3]), face_signature(&[-0.2, 0.3]));
    }

    #[test]
    fn test_signature_is_hex() {
        let sig = face_signature(&[0.12, -0.5, 0.33]);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_one_prompt_at_a_time() {
        let mut gate = EnrollmentGate::new(Duration::from_secs(90));
        let now = Instant::now();
        assert!(gate.should_prompt("a", now));
        assert!(!gate.should_prompt("b", now));
        assert_eq!(gate.awaiting(), Some("a"));
    }

    #[test]
    fn test_dismiss_keeps_cooldown() {
        let mut gate = EnrollmentGate::new(Duration::from_secs(90));
        let now = Instant::now();
        assert!(gate.should_prompt("a", now));
        gate.dismiss("a");
        assert!(!gate.should_prompt("a", now + Duration::from_secs(10)));
        assert!(gate.should_prompt("b", now + Duration::from_secs(10)));
        gate.dismiss("b");
        assert!(gate.should_prompt("a", now + Duration::from_secs(90)));
    }

    #[test]
    fn test_resolve_clears_cooldown() {
        let mut gate = EnrollmentGate::new(Duration::from_secs(90));
        let now = Instant::now();
        assert!(gate.should_prompt("a", now));
        gate.resolve("a");
        assert_eq!(gate.awaiting(), None);
        assert!(gate.should_prompt("a", now + Duration::from_secs(1)));
    }

    #[test]
    fn test_answer_for_other_signature_keeps_wait() {
        let mut gate = EnrollmentGate::new(Duration::from_secs(90));
        let now = Instant::now();
        assert!(gate.should_prompt("a", now));
        gate.dismiss("zzz");
        assert_eq!(gate.awaiting(), Some("a"));
    }
}
