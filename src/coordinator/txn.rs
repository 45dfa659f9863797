//! Conditional transaction helpers shared by the admin processor and the
//! election engine.

use crate::common::{Backoff, CoordinatorConfig, CoordinatorMetrics, Error, Result};
use crate::coordinator::paths;
use crate::coordinator::state::{decode, encode, CollectionProps, CoreClaim, LiveNode, Shard};
use crate::metastore::{Commit, MetaStore, Op, Revision, Version};
use std::collections::BTreeMap;
use std::future::Future;

/// Run `build` and commit the ops it returns, retrying on version conflicts.
///
/// `build` must read everything it depends on from the store on each call.
/// Returning `Ok(None)` means there is nothing to write.
pub(crate) async fn commit_with_retry<F, Fut>(
    store: &dyn MetaStore,
    config: &CoordinatorConfig,
    metrics: &CoordinatorMetrics,
    what: &str,
    mut build: F,
) -> Result<Option<Revision>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Vec<Op>>>>,
{
    let mut backoff = Backoff::new(config.cas_backoff(), config.cas_backoff_max());
    let mut last_conflict = String::new();

    for attempt in 1..=config.cas_max_attempts {
        let Some(ops) = build().await? else {
            return Ok(None);
        };

        match store.transact(ops)? {
            Commit::Committed { revision } => return Ok(Some(revision)),
            Commit::Conflict { key, current } => {
                metrics.cas_conflicts.inc();
                tracing::debug!(
                    op = what,
                    key = %key,
                    current,
                    attempt,
                    "version conflict, retrying"
                );
                last_conflict = key;
                if attempt < config.cas_max_attempts {
                    backoff.wait().await;
                }
            }
        }
    }

    tracing::warn!(op = what, key = %last_conflict, "giving up after repeated version conflicts");
    Err(Error::ConcurrentModification {
        key: last_conflict,
        attempts: config.cas_max_attempts,
    })
}

pub(crate) fn read_props(store: &dyn MetaStore, collection: &str) -> Result<Option<(CollectionProps, Version)>> {
    let key = paths::collection_key(collection);
    match store.read(&key)? {
        Some(entry) => Ok(Some((decode(&key, &entry.value)?, entry.version))),
        None => Ok(None),
    }
}

/// Shard record with `version` set to its store version.
pub(crate) fn read_shard(store: &dyn MetaStore, collection: &str, shard: &str) -> Result<Option<Shard>> {
    let key = paths::shard_key(collection, shard);
    match store.read(&key)? {
        Some(entry) => {
            let mut record: Shard = decode(&key, &entry.value)?;
            record.version = entry.version;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

pub(crate) fn read_claim(store: &dyn MetaStore, core_name: &str) -> Result<Option<(CoreClaim, Version)>> {
    let key = paths::core_key(core_name);
    match store.read(&key)? {
        Some(entry) => Ok(Some((decode(&key, &entry.value)?, entry.version))),
        None => Ok(None),
    }
}

pub(crate) fn read_live_node(store: &dyn MetaStore, node_name: &str) -> Result<Option<(LiveNode, Version)>> {
    let key = paths::live_node_key(node_name);
    match store.read(&key)? {
        Some(entry) => Ok(Some((decode(&key, &entry.value)?, entry.version))),
        None => Ok(None),
    }
}

/// All liveness registrations, keyed by node name, and the listing revision.
pub(crate) fn list_live_nodes(store: &dyn MetaStore) -> Result<(BTreeMap<String, LiveNode>, Revision)> {
    let listing = store.list(paths::LIVE_NODES_ROOT)?;
    let mut nodes = BTreeMap::new();
    for (key, entry) in listing.entries {
        let node: LiveNode = decode(&key, &entry.value)?;
        nodes.insert(node.node_name.clone(), node);
    }
    Ok((nodes, listing.revision))
}

/// Attempts for single-key liveness writes, which only race each other
const LIVENESS_ATTEMPTS: usize = 16;

/// Create or replace a liveness registration.
pub(crate) fn put_live_node(store: &dyn MetaStore, node: &LiveNode) -> Result<Revision> {
    let key = paths::live_node_key(&node.node_name);
    let value = encode(node)?;
    for _ in 0..LIVENESS_ATTEMPTS {
        let expected = store.read(&key)?.map_or(0, |e| e.version);
        if let Commit::Committed { revision } = store.conditional_write(&key, value.clone(), expected)? {
            return Ok(revision);
        }
    }
    Err(Error::ConcurrentModification {
        key,
        attempts: LIVENESS_ATTEMPTS,
    })
}

/// Remove a liveness registration. `false` if there was none.
pub(crate) fn delete_live_node(store: &dyn MetaStore, node_name: &str) -> Result<bool> {
    let key = paths::live_node_key(node_name);
    for _ in 0..LIVENESS_ATTEMPTS {
        let Some(entry) = store.read(&key)? else {
            return Ok(false);
        };
        let ops = vec![Op::Delete {
            key: key.clone(),
            expected: entry.version,
        }];
        if store.transact(ops)?.is_committed() {
            return Ok(true);
        }
    }
    Err(Error::ConcurrentModification {
        key,
        attempts: LIVENESS_ATTEMPTS,
    })
}
