//! Node runtime
//!
//! The coordinator never touches replica data itself. Everything that happens
//! on a node (creating a core, syncing it from the leader, unloading it) goes
//! through [`NodeRuntime`].

pub mod core;
pub mod local;

pub use local::LocalNodes;

use crate::common::Result;
use crate::coordinator::state::{Replica, ReplicaState};
use async_trait::async_trait;

/// What a node needs to create a replica core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSpec {
    pub core_name: String,
    pub collection: String,
    pub shard: String,
    pub node_name: String,
    /// Reuse the data left in this directory by an earlier core
    pub data_dir: Option<String>,
}

#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Create the core on its node. The core starts `down`.
    async fn instantiate_replica(&self, spec: &ReplicaSpec) -> Result<()>;

    /// Bring the core up to date. With a leader the core copies the leader's
    /// data; without one it becomes active on whatever it holds locally.
    async fn recover_replica(&self, replica: &Replica, leader: Option<&Replica>) -> Result<()>;

    /// Unload the core. Without `force` in-flight writes finish first.
    async fn tear_down_replica(&self, replica: &Replica, force: bool) -> Result<()>;

    /// State the node reports for the core
    async fn replica_state(&self, replica: &Replica) -> Result<ReplicaState>;

    /// Last update the core has applied; higher is more up to date
    async fn replication_position(&self, replica: &Replica) -> Result<u64>;
}
