//! Error types for shardkeeper

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Topology Errors ===
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Shard not found: {collection}/{shard}")]
    ShardNotFound { collection: String, shard: String },

    #[error("Replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("Core name already in use: {0}")]
    DuplicateCoreName(String),

    #[error("No leader for {collection}/{shard}")]
    LeaderNotFound { collection: String, shard: String },

    // === Concurrency Errors ===
    #[error("Concurrent modification of {key} (gave up after {attempts} attempts)")]
    ConcurrentModification { key: String, attempts: usize },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Node Errors ===
    #[error("Node {node} unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("No live nodes available for placement")]
    NoLiveNodes,

    // === Metadata Errors ===
    #[cfg(feature = "rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConcurrentModification { .. } | Error::NodeUnavailable { .. }
        )
    }

    pub(crate) fn node_unavailable(node: impl Into<String>, reason: impl ToString) -> Self {
        Error::NodeUnavailable {
            node: node.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn shard_not_found(collection: &str, shard: &str) -> Self {
        Error::ShardNotFound {
            collection: collection.to_string(),
            shard: shard.to_string(),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
