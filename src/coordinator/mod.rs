//! Cluster state coordinator
//!
//! The coordinator is responsible for:
//! - Topology (collections, shards, replicas, live nodes) kept in the metadata store
//! - Admin commands as conditional store transactions
//! - Per-shard leader election and failover
//! - Convergence waits over topology snapshots

pub mod admin;
pub mod election;
pub mod paths;
pub mod placement;
pub mod server;
pub mod state;
pub mod topology;
pub(crate) mod txn;
pub mod waiter;

pub use admin::{AddReplica, CreateCollection};
pub use election::ElectionPhase;
pub use server::Coordinator;
pub use state::{ClusterState, Collection, CollectionProps, LiveNode, Replica, ReplicaRole, ReplicaState, Shard};
pub use topology::{CollectionWatch, TopologyModel};
pub use waiter::Convergence;
