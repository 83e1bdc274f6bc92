//! Persistent memory ledger
//!
//! Counts how often each label has appeared and keeps a bounded history of
//! novel sightings. State lives under [`keys::MEMORY`] and is rewritten after
//! every mutation.

use crate::error::VisionError;
use chrono::{DateTime, Utc};
use lookout_core::store::{load_json, save_json};
use lookout_core::{keys, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A label seen with an unfamiliar appearance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelEvent {
    pub label: String,
    pub confidence: f32,
    pub at: DateTime<Utc>,
}

/// Point-in-time copy of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSnapshot {
    pub counts: BTreeMap<String, u64>,
    pub novel: VecDeque<NovelEvent>,
}

impl LedgerSnapshot {
    pub fn count(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }
}

/// Label counts and novelty history backed by a key-value store
pub struct MemoryLedger {
    store: Arc<dyn KeyValueStore>,
    state: Option<LedgerSnapshot>,
    history_len: usize,
}

impl MemoryLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, history_len: usize) -> Self {
        Self {
            store,
            state: None,
            history_len: history_len.max(1),
        }
    }

    fn state(&mut self) -> Result<&mut LedgerSnapshot, VisionError> {
        if self.state.is_none() {
            let loaded: LedgerSnapshot = load_json(self.store.as_ref(), keys::MEMORY)?;
            debug!("Loaded memory ledger with {} labels", loaded.counts.len());
            self.state = Some(loaded);
        }
        Ok(self.state.get_or_insert_with(LedgerSnapshot::default))
    }

    fn persist(&self) -> Result<(), VisionError> {
        if let Some(state) = &self.state {
            save_json(self.store.as_ref(), keys::MEMORY, state)?;
        }
        Ok(())
    }

    /// Increment the occurrence count for `label`, returning the new count
    pub fn bump(&mut self, label: &str) -> Result<u64, VisionError> {
        let state = self.state()?;
        let count = state.counts.entry(label.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        self.persist()?;
        Ok(count)
    }

    /// Append a novelty event, dropping the oldest past the history cap
    pub fn record_novel(&mut self, label: &str, confidence: f32) -> Result<(), VisionError> {
        let cap = self.history_len;
        let state = self.state()?;
        state.novel.push_back(NovelEvent {
            label: label.to_string(),
            confidence,
            at: Utc::now(),
        });
        while state.novel.len() > cap {
            state.novel.pop_front();
        }
        self.persist()
    }

    pub fn snapshot(&mut self) -> Result<LedgerSnapshot, VisionError> {
        Ok(self.state()?.clone())
    }

    /// Forget all counts and history
    pub fn clear(&mut self) -> Result<(), VisionError> {
        self.state = Some(LedgerSnapshot::default());
        self.persist()
    }
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedger")
            .field("loaded", &self.state.is_some())
            .field("history_len", &self.history_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::MemoryStore;

    #[test]
    fn test_bump_counts_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let mut ledger = MemoryLedger::new(store.clone(), 200);
        assert_eq!(ledger.bump("cup").unwrap(), 1);
        assert_eq!(ledger.bump("cup").unwrap(), 2);
        assert_eq!(ledger.bump("book").unwrap(), 1);

        let mut reopened = MemoryLedger::new(store, 200);
        let snapshot = reopened.snapshot().unwrap();
        assert_eq!(snapshot.count("cup"), 2);
        assert_eq!(snapshot.count("book"), 1);
        assert_eq!(snapshot.count("dog"), 0);
    }

    #[test]
    fn test_novel_history_is_capped() {
        let store = Arc::new(MemoryStore::new());
        let mut ledger = MemoryLedger::new(store, 3);
        for i in 0..5 {
            ledger.record_novel(&format!("label{}", i), 0.5).unwrap();
        }
        let snapshot = ledger.snapshot().unwrap();
        let labels: Vec<_> = snapshot.novel.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["label2", "label3", "label4"]);
    }

    #[test]
    fn test_corrupted_ledger_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::MEMORY, "{not json").unwrap();
        let mut ledger = MemoryLedger::new(store.clone(), 200);
        assert_eq!(ledger.snapshot().unwrap(), LedgerSnapshot::default());

        ledger.bump("tv").unwrap();
        let raw = store.get(keys::MEMORY).unwrap().unwrap();
        assert!(raw.contains("\"tv\""));
    }

    #[test]
    fn test_clear_resets_store() {
        let store = Arc::new(MemoryStore::new());
        let mut ledger = MemoryLedger::new(store.clone(), 200);
        ledger.bump("cup").unwrap();
        ledger.record_novel("cup", 0.9).unwrap();
        ledger.clear().unwrap();

        let mut reopened = MemoryLedger::new(store, 200);
        assert_eq!(reopened.snapshot().unwrap(), LedgerSnapshot::default());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = Arc::new(MemoryStore::new());
        let mut ledger = MemoryLedger::new(store, 200);
        ledger.bump("cup").unwrap();
        let mut snapshot = ledger.snapshot().unwrap();
        snapshot.counts.insert("cup".to_string(), 99);
        assert_eq!(ledger.snapshot().unwrap().count("cup"), 1);
    }
}
