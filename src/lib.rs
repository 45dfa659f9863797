//! # shardkeeper
//!
//! Cluster state coordinator for a sharded, replicated document cluster:
//! - Collection / shard / replica topology in a versioned metadata store
//! - Admin commands applied as conditional multi-key transactions
//! - Per-shard leader election with failover on removal or node loss
//! - Convergence waits driven by topology change notifications
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   admin command
//!        │
//! ┌──────▼──────────┐   conditional txn   ┌────────────────┐
//! │ AdminProcessor  ├────────────────────►│   MetaStore    │
//! └──────┬──────────┘                     │ (memory/rocks) │
//!        │ NodeRuntime                    └───────┬────────┘
//! ┌──────▼──────────┐                     watch   │
//! │ nodes (cores)   │               ┌─────────────▼───┐
//! └─────────────────┘               │  TopologyModel  │ snapshot
//!                                   └──┬───────────┬──┘
//!                          ┌───────────▼──┐    ┌───▼──────────────┐
//!                          │ElectionEngine│    │ConvergenceWaiter │
//!                          └──────────────┘    └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run a scenario against an in-process cluster
//! shardkeeper simulate --scenario failover.toml
//!
//! # Print the effective configuration
//! shardkeeper config
//! ```

pub mod common;
pub mod coordinator;
pub mod metastore;
pub mod node;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
