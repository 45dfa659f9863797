//! Replica core held by a simulated node
//!
//! A core is a small document index plus the replication position of the
//! last update it applied. The leader assigns positions; followers apply
//! updates with the position they were given, so an up-to-date follower
//! reports the same position as its leader.

use crate::coordinator::state::ReplicaState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indexed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: String,
    /// Position of the update that wrote this document
    pub position: u64,
}

/// Durable part of a core, survives an unload when a data dir is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreData {
    docs: BTreeMap<String, Document>,
    position: u64,
}

impl CoreData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update at `position`. Older positions never overwrite newer
    /// documents.
    pub fn apply(&mut self, id: &str, body: &str, position: u64) {
        let newer = self
            .docs
            .get(id)
            .map_or(true, |existing| existing.position < position);
        if newer {
            self.docs.insert(
                id.to_string(),
                Document {
                    id: id.to_string(),
                    body: body.to_string(),
                    position,
                },
            );
        }
        self.position = self.position.max(position);
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

/// A live core on a node
#[derive(Debug)]
pub struct Core {
    pub collection: String,
    pub shard: String,
    pub data_dir: Option<String>,
    pub state: ReplicaState,
    pub data: CoreData,
}

impl Core {
    pub fn new(collection: &str, shard: &str, data_dir: Option<String>, data: CoreData) -> Self {
        Self {
            collection: collection.to_string(),
            shard: shard.to_string(),
            data_dir,
            state: ReplicaState::Down,
            data,
        }
    }

    /// Replace local data with a copy of the leader's
    pub fn sync_from(&mut self, leader: &CoreData) {
        self.data = leader.clone();
    }
}
