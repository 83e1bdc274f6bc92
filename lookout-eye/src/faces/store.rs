//! Face identity store
//!
//! Each person is a small cluster of embeddings. Matching is plain
//! nearest-neighbour over every stored embedding.

use crate::error::VisionError;
use chrono::{DateTime, Utc};
use lookout_core::store::{load_json, save_json};
use lookout_core::{keys, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// A named person with their recent embeddings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub embeddings: VecDeque<Vec<f32>>,
    pub last_seen: DateTime<Utc>,
    pub seen: u64,
}

/// Result of a successful nearest-neighbour lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub name: String,
    pub distance: f32,
}

type PeopleMap = BTreeMap<String, Person>;

/// Persistent name → embeddings map
pub struct FaceStore {
    store: Arc<dyn KeyValueStore>,
    max_embeddings: usize,
}

impl FaceStore {
    pub fn new(store: Arc<dyn KeyValueStore>, max_embeddings: usize) -> Self {
        Self {
            store,
            max_embeddings: max_embeddings.max(1),
        }
    }

    fn load(&self) -> Result<PeopleMap, VisionError> {
        Ok(load_json(self.store.as_ref(), keys::FACES)?)
    }

    fn save(&self, people: &PeopleMap) -> Result<(), VisionError> {
        Ok(save_json(self.store.as_ref(), keys::FACES, people)?)
    }

    /// Closest stored person within `threshold` Euclidean distance
    pub fn match_embedding(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<FaceMatch>, VisionError> {
        if embedding.is_empty() {
            return Ok(None);
        }

        let people = self.load()?;
        let mut best: Option<FaceMatch> = None;

        for person in people.values() {
            for known in &person.embeddings {
                let Some(distance) = euclidean_distance(known, embedding) else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| distance < b.distance) {
                    best = Some(FaceMatch {
                        name: person.name.clone(),
                        distance,
                    });
                }
            }
        }

        Ok(best.filter(|m| m.distance <= threshold))
    }

    /// Add `embedding` to `name`, creating the person if needed
    pub fn upsert(&self, name: &str, embedding: &[f32]) -> Result<Person, VisionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VisionError::Processing("Face name cannot be empty".to_string()));
        }
        if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::Processing(format!(
                "Invalid embedding for '{}'",
                name
            )));
        }

        let mut people = self.load()?;
        let now = Utc::now();
        let person = people.entry(name.to_string()).or_insert_with(|| {
            info!("Enrolled new face '{}'", name);
            Person {
                name: name.to_string(),
                embeddings: VecDeque::new(),
                last_seen: now,
                seen: 0,
            }
        });

        person.embeddings.push_back(embedding.to_vec());
        while person.embeddings.len() > self.max_embeddings {
            person.embeddings.pop_front();
        }
        person.last_seen = now;
        person.seen += 1;
        let updated = person.clone();

        self.save(&people)?;
        debug!("Updated face '{}' ({} embeddings)", name, updated.embeddings.len());
        Ok(updated)
    }

    pub fn get(&self, name: &str) -> Result<Option<Person>, VisionError> {
        Ok(self.load()?.remove(name))
    }

    /// All people, ordered by name
    pub fn people(&self) -> Result<Vec<Person>, VisionError> {
        Ok(self.load()?.into_values().collect())
    }

    /// Remove one person, returning whether they existed
    pub fn forget(&self, name: &str) -> Result<bool, VisionError> {
        let mut people = self.load()?;
        let existed = people.remove(name).is_some();
        if existed {
            self.save(&people)?;
            info!("Forgot face '{}'", name);
        }
        Ok(existed)
    }

    pub fn forget_all(&self) -> Result<(), VisionError> {
        self.store.remove(keys::FACES)?;
        info!("Forgot all faces");
        Ok(())
    }
}

impl std::fmt::Debug for FaceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceStore")
            .field("max_embeddings", &self.max_embeddings)
            .finish()
    }
}

/// Euclidean distance, `None` when dimensions differ
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    let distance = sum.sqrt();
    distance.is_finite().then_some(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::MemoryStore;

    fn face_store() -> FaceStore {
        FaceStore::new(Arc::new(MemoryStore::new()), 20)
    }

    #[test]
    fn test_match_empty_store() {
        let faces = face_store();
        assert_eq!(faces.match_embedding(&[0.1, 0.2], 0.55).unwrap(), None);
    }

    #[test]
    fn test_match_within_threshold() {
        let faces = face_store();
        faces.upsert("Ada", &[0.0, 0.0, 0.0]).unwrap();
        faces.upsert("Grace", &[1.0, 1.0, 1.0]).unwrap();

        let m = faces.match_embedding(&[0.1, 0.0, 0.0], 0.55).unwrap().unwrap();
        assert_eq!(m.name, "Ada");
        assert!((m.distance - 0.1).abs() < 1e-6);

        assert_eq!(faces.match_embedding(&[0.5, 0.5, 0.5], 0.55).unwrap(), None);
    }

    #[test]
    fn test_match_at_threshold_is_accepted() {
        let faces = face_store();
        faces.upsert("Ada", &[0.0, 0.0]).unwrap();
        let m = faces.match_embedding(&[0.5, 0.0], 0.5).unwrap();
        assert_eq!(m.map(|m| m.name), Some("Ada".to_string()));
    }

    #[test]
    fn test_match_skips_other_dimensions() {
        let faces = face_store();
        faces.upsert("Ada", &[0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(faces.match_embedding(&[0.0, 0.0], 10.0).unwrap(), None);
    }

    #[test]
    fn test_upsert_rejects_bad_input() {
        let faces = face_store();
        assert!(faces.upsert("", &[0.1]).is_err());
        assert!(faces.upsert("   ", &[0.1]).is_err());
        assert!(faces.upsert("Ada", &[]).is_err());
        assert!(faces.upsert("Ada", &[f32::NAN]).is_err());
        assert!(faces.people().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_caps_embeddings() {
        let faces = FaceStore::new(Arc::new(MemoryStore::new()), 3);
        for i in 0..5 {
            faces.upsert("Ada", &[i as f32]).unwrap();
        }
        let ada = faces.get("Ada").unwrap().unwrap();
        assert_eq!(ada.seen, 5);
        let stored: Vec<f32> = ada.embeddings.iter().map(|e| e[0]).collect();
        assert_eq!(stored, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_twenty_five_upserts_keep_latest_twenty() {
        let faces = face_store();
        for i in 0..25 {
            faces.upsert("Ada", &[i as f32, 0.0]).unwrap();
        }
        let ada = faces.get("Ada").unwrap().unwrap();
        assert_eq!(ada.embeddings.len(), 20);
        let firsts: Vec<f32> = ada.embeddings.iter().map(|e| e[0]).collect();
        let expected: Vec<f32> = (5..25).map(|i| i as f32).collect();
        assert_eq!(firsts, expected);
    }

    #[test]
    fn test_forget() {
        let faces = face_store();
        faces.upsert("Ada", &[0.0]).unwrap();
        faces.upsert("Grace", &[1.0]).unwrap();
        assert!(faces.forget("Ada").unwrap());
        assert!(!faces.forget("Ada").unwrap());
        let names: Vec<_> = faces.people().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Grace"]);

        faces.forget_all().unwrap();
        assert!(faces.people().unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_store_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::FACES, "[[[").unwrap();
        let faces = FaceStore::new(store, 20);
        assert!(faces.people().unwrap().is_empty());
        faces.upsert("Ada", &[0.3]).unwrap();
        assert_eq!(faces.people().unwrap().len(), 1);
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(euclidean_distance(&[0.0], &[3.0, 4.0]), None);
    }
}
