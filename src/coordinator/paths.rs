//! Metadata store key layout
//!
//! ```text
//! /collections/{collection}/collection      collection properties
//! /collections/{collection}/shards/{shard}  shard record
//! /cores/{core}                             core-name claim
//! /live_nodes/{node}                        liveness registration
//! ```
//!
//! Every name is percent-encoded into a single path segment.

use crate::common::{decode_segment, encode_segment};

pub const COLLECTIONS_ROOT: &str = "/collections/";
pub const CORES_ROOT: &str = "/cores/";
pub const LIVE_NODES_ROOT: &str = "/live_nodes/";

pub fn collection_prefix(collection: &str) -> String {
    format!("{}{}/", COLLECTIONS_ROOT, encode_segment(collection))
}

pub fn collection_key(collection: &str) -> String {
    format!("{}collection", collection_prefix(collection))
}

pub fn shard_key(collection: &str, shard: &str) -> String {
    format!("{}shards/{}", collection_prefix(collection), encode_segment(shard))
}

pub fn core_key(core_name: &str) -> String {
    format!("{}{}", CORES_ROOT, encode_segment(core_name))
}

pub fn live_node_key(node_name: &str) -> String {
    format!("{}{}", LIVE_NODES_ROOT, encode_segment(node_name))
}

/// Collection a `/collections/...` key belongs to.
pub fn collection_of(key: &str) -> Option<String> {
    let rest = key.strip_prefix(COLLECTIONS_ROOT)?;
    let segment = rest.split('/').next().filter(|s| !s.is_empty())?;
    decode_segment(segment).ok()
}

/// Core name a `/cores/...` claim key stands for.
pub fn core_of(key: &str) -> Option<String> {
    let segment = key.strip_prefix(CORES_ROOT).filter(|s| !s.is_empty())?;
    decode_segment(segment).ok()
}
