//! lookout-core: shared plumbing for the Lookout perception engine
//!
//! Holds the workspace-wide error type and the local durable key-value
//! store that backs face identities, the memory ledger and user settings.

pub mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{keys, FileStore, KeyValueStore, MemoryStore};
