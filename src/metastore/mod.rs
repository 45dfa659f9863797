//! Metadata store contract
//!
//! A consistent key/value store with per-key versions, conditional
//! (multi-key) transactions and prefix watches. The coordinator treats it as
//! the single source of truth and never writes without a version check.
//!
//! Version `0` always means "the key does not exist".

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

use crate::common::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Per-key version, bumped on every write of that key.
pub type Version = u64;

/// Store-wide revision, bumped once per committed transaction.
pub type Revision = u64;

/// A stored value with its version information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: Version,
    /// Revision of the transaction that created the key.
    pub create_revision: Revision,
    /// Revision of the transaction that last wrote the key.
    pub mod_revision: Revision,
}

/// One step of a conditional transaction.
#[derive(Debug, Clone)]
pub enum Op {
    /// Write `value` if the key is currently at `expected` (0 = absent).
    Put {
        key: String,
        value: Vec<u8>,
        expected: Version,
    },
    /// Delete the key if it is currently at `expected`.
    Delete { key: String, expected: Version },
    /// Assert the key is at `expected` without writing it.
    Check { key: String, expected: Version },
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Put { key, .. } | Op::Delete { key, .. } | Op::Check { key, .. } => key,
        }
    }

    pub fn expected(&self) -> Version {
        match self {
            Op::Put { expected, .. } | Op::Delete { expected, .. } | Op::Check { expected, .. } => {
                *expected
            }
        }
    }
}

/// Outcome of a conditional transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    Committed { revision: Revision },
    /// Nothing was written: `key` was at `current`, not at the expected version.
    Conflict { key: String, current: Version },
}

impl Commit {
    pub fn is_committed(&self) -> bool {
        matches!(self, Commit::Committed { .. })
    }
}

/// Consistent listing of a key range.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<(String, Versioned)>,
    /// Store revision the listing reflects.
    pub revision: Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Put,
    Delete,
}

/// Change notification for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    pub kind: EventKind,
    /// Version after the change (0 for deletes).
    pub version: Version,
    pub revision: Revision,
}

/// What a [`StoreWatch`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(StoreEvent),
    /// Events were dropped; the consumer must resynchronise from a listing.
    Lagged(u64),
}

/// Receiver for changes under a key prefix. Dropping it unsubscribes.
pub struct StoreWatch {
    prefix: String,
    rx: broadcast::Receiver<StoreEvent>,
}

impl StoreWatch {
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<StoreEvent>) -> Self {
        Self {
            prefix: prefix.into(),
            rx,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next change under the prefix; `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => {
                    return Some(WatchEvent::Changed(event))
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(WatchEvent::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Metadata store backend.
pub trait MetaStore: Send + Sync {
    /// Current value and version of a key.
    fn read(&self, key: &str) -> Result<Option<Versioned>>;

    /// All keys under `prefix`, in key order, as of one revision.
    fn list(&self, prefix: &str) -> Result<Listing>;

    /// Apply every op or none of them.
    fn transact(&self, ops: Vec<Op>) -> Result<Commit>;

    /// Subscribe to changes under `prefix`. Events committed after this call
    /// returns are delivered (or reported as lagged).
    fn watch(&self, prefix: &str) -> StoreWatch;

    /// Latest committed revision.
    fn revision(&self) -> Revision;

    /// Single-key compare-and-swap.
    fn conditional_write(&self, key: &str, value: Vec<u8>, expected: Version) -> Result<Commit> {
        self.transact(vec![Op::Put {
            key: key.to_string(),
            value,
            expected,
        }])
    }
}
