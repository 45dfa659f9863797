//! Topology data model
//!
//! Stored records (`CollectionProps`, `Shard`, `CoreClaim`, `LiveNode`) and the
//! immutable `ClusterState` snapshot assembled from them.

use crate::common::{Error, Result};
use crate::metastore::{Revision, Version};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaState {
    Down,
    Recovering,
    Active,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaState::Down => write!(f, "down"),
            ReplicaState::Recovering => write!(f, "recovering"),
            ReplicaState::Active => write!(f, "active"),
        }
    }
}

/// One physical copy of a shard, hosted on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub core_name: String,
    pub node_name: String,
    pub base_url: String,
    pub role: ReplicaRole,
    pub state: ReplicaState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Shard-local registration sequence; lower registered earlier.
    pub registered_at: u64,
}

impl Replica {
    /// URL addressing this core directly, bypassing routing
    pub fn core_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.core_name)
    }

    pub fn is_leader(&self) -> bool {
        self.role == ReplicaRole::Leader
    }

    pub fn is_active(&self) -> bool {
        self.state == ReplicaState::Active
    }
}

/// Shard record, stored at `/collections/{c}/shards/{s}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub name: String,
    /// Replicas in registration order
    pub replicas: Vec<Replica>,
    /// Incremented by every committed election
    pub leader_epoch: u64,
    /// Next registration sequence handed to an added replica
    pub next_registration: u64,
    /// Store version this record was read at
    #[serde(skip)]
    pub version: Version,
}

impl Shard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: Vec::new(),
            leader_epoch: 0,
            next_registration: 1,
            version: 0,
        }
    }

    pub fn leader(&self) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.is_leader())
    }

    pub fn replica(&self, core_name: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.core_name == core_name)
    }

    pub fn replica_mut(&mut self, core_name: &str) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.core_name == core_name)
    }

    pub fn contains(&self, core_name: &str) -> bool {
        self.replica(core_name).is_some()
    }
}

/// Collection properties, stored at `/collections/{c}/collection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProps {
    pub name: String,
    pub config_name: String,
    pub replication_factor: usize,
    /// Fixed at creation, in routing order
    pub shard_names: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Core-name claim, stored at `/cores/{core}`. Makes core names unique
/// cluster-wide and maps a core back to its shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreClaim {
    pub collection: String,
    pub shard: String,
}

/// Liveness registration, stored at `/live_nodes/{node}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveNode {
    pub node_name: String,
    pub base_url: String,
    pub registered_at: DateTime<Utc>,
}

/// A collection as seen in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub props: CollectionProps,
    pub shards: Vec<Shard>,
    /// Store revision the collection was fetched at
    pub revision: Revision,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.props.name
    }

    pub fn shard(&self, name: &str) -> Option<&Shard> {
        self.shards.iter().find(|s| s.name == name)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn replicas(&self) -> impl Iterator<Item = (&Shard, &Replica)> {
        self.shards
            .iter()
            .flat_map(|shard| shard.replicas.iter().map(move |r| (shard, r)))
    }

    pub fn contains_core(&self, core_name: &str) -> bool {
        self.shards.iter().any(|s| s.contains(core_name))
    }
}

/// Immutable, versioned view of the cluster topology.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterState {
    /// Bumped every time the snapshot is replaced
    pub version: u64,
    pub live_nodes: BTreeMap<String, LiveNode>,
    pub collections: BTreeMap<String, Arc<Collection>>,
    /// Store revision last applied per collection, deletions included
    #[serde(skip)]
    pub(crate) observed: BTreeMap<String, Revision>,
    #[serde(skip)]
    pub(crate) live_nodes_revision: Revision,
}

impl ClusterState {
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name).map(|c| c.as_ref())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn shard(&self, collection: &str, shard: &str) -> Option<&Shard> {
        self.collection(collection)?.shard(shard)
    }

    pub fn is_live(&self, node_name: &str) -> bool {
        self.live_nodes.contains_key(node_name)
    }

    /// Leader of a shard, if it is active on a live node
    pub fn leader(&self, collection: &str, shard: &str) -> Option<&Replica> {
        self.shard(collection, shard)?
            .leader()
            .filter(|r| r.is_active() && self.is_live(&r.node_name))
    }

    /// Locate a core anywhere in the cluster
    pub fn find_replica(&self, core_name: &str) -> Option<(&Collection, &Shard, &Replica)> {
        self.collections.values().find_map(|collection| {
            collection
                .replicas()
                .find(|(_, r)| r.core_name == core_name)
                .map(|(shard, replica)| (collection.as_ref(), shard, replica))
        })
    }

    /// Store revision at which `collection` was last applied, if ever.
    pub fn collection_revision(&self, collection: &str) -> Option<Revision> {
        self.observed.get(collection).copied()
    }

    pub(crate) fn watch_key(&self, collection: &str) -> (Option<Revision>, Revision) {
        (self.collection_revision(collection), self.live_nodes_revision)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::MetadataCorrupted(format!("{}: {}", key, e)))
}
