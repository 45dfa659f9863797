//! In-process nodes
//!
//! `LocalNodes` hosts replica cores for any number of named nodes inside the
//! current process. Nodes register themselves in the metadata store when
//! started and lose that registration when crashed, which is exactly what a
//! real node's session expiry looks like to the coordinator.
//!
//! Writes go through [`LocalNodes::index`]: the shard leader assigns each
//! update a position and forwards it to every active or recovering follower.

use super::core::{Core, CoreData};
use super::{NodeRuntime, ReplicaSpec};
use crate::common::{Error, Result};
use crate::coordinator::state::{ClusterState, LiveNode, Replica, ReplicaState};
use crate::coordinator::txn;
use crate::metastore::MetaStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type CoreHandle = Arc<tokio::sync::Mutex<Core>>;

const FIRST_PORT: u16 = 8983;

struct SimNode {
    base_url: String,
    up: bool,
    cores: HashMap<String, CoreHandle>,
}

pub struct LocalNodes {
    store: Arc<dyn MetaStore>,
    nodes: Mutex<BTreeMap<String, SimNode>>,
    /// Data left behind by unloaded cores, keyed by data dir
    retained: Mutex<HashMap<String, CoreData>>,
    next_port: AtomicU16,
    recovery_delay: Mutex<Duration>,
}

impl LocalNodes {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self {
            store,
            nodes: Mutex::new(BTreeMap::new()),
            retained: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(FIRST_PORT),
            recovery_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Start (or restart) a node and register it as live.
    pub fn start_node(&self, node_name: &str) -> Result<LiveNode> {
        crate::common::validate_name("node", node_name)?;

        let base_url = {
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            let node = nodes.entry(node_name.to_string()).or_insert_with(|| {
                let port = self.next_port.fetch_add(1, Ordering::SeqCst);
                SimNode {
                    base_url: format!("http://{}.local:{}/solr", node_name, port),
                    up: false,
                    cores: HashMap::new(),
                }
            });
            node.up = true;
            node.base_url.clone()
        };

        let live = LiveNode {
            node_name: node_name.to_string(),
            base_url,
            registered_at: Utc::now(),
        };
        txn::put_live_node(self.store.as_ref(), &live)?;
        tracing::info!(node = node_name, url = %live.base_url, "node started");
        Ok(live)
    }

    /// Stop a node without any cleanup. Its cores stay on "disk" but are
    /// unreachable until the node is started again.
    pub fn crash_node(&self, node_name: &str) -> Result<()> {
        {
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            let node = nodes
                .get_mut(node_name)
                .ok_or_else(|| Error::node_unavailable(node_name, "unknown node"))?;
            node.up = false;
        }
        txn::delete_live_node(self.store.as_ref(), node_name)?;
        tracing::warn!(node = node_name, "node crashed");
        Ok(())
    }

    /// Make every recovery take at least `delay`, so callers can observe the
    /// `recovering` state.
    pub fn set_recovery_delay(&self, delay: Duration) {
        *self.recovery_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    fn recovery_delay(&self) -> Duration {
        *self.recovery_delay.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn core(&self, node_name: &str, core_name: &str) -> Result<CoreHandle> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .get(node_name)
            .filter(|n| n.up)
            .ok_or_else(|| Error::node_unavailable(node_name, "node is down"))?;
        node.cores
            .get(core_name)
            .cloned()
            .ok_or_else(|| Error::node_unavailable(node_name, format!("no core {}", core_name)))
    }

    /// Number of documents a core holds
    pub async fn num_found(&self, core_name: &str) -> Result<usize> {
        let handle = {
            let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            let found = nodes
                .values()
                .filter(|n| n.up)
                .find_map(|n| n.cores.get(core_name).cloned());
            found
        };
        match handle {
            Some(core) => Ok(core.lock().await.data.len()),
            None => Err(Error::ReplicaNotFound(core_name.to_string())),
        }
    }

    /// Index documents into a collection. Each document is routed to its
    /// shard by id, written on the shard leader and forwarded to followers.
    /// Returns the number of documents accepted.
    pub async fn index(
        &self,
        state: &ClusterState,
        collection: &str,
        docs: &[(String, String)],
    ) -> Result<usize> {
        let coll = state
            .collection(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let mut by_shard: BTreeMap<&str, Vec<&(String, String)>> = BTreeMap::new();
        for doc in docs {
            let shard = route(&doc.0, &coll.props.shard_names)
                .ok_or_else(|| Error::Internal(format!("{} has no shards", collection)))?;
            by_shard.entry(shard).or_default().push(doc);
        }

        let mut accepted = 0;
        for (shard_name, batch) in by_shard {
            let shard = coll
                .shard(shard_name)
                .ok_or_else(|| Error::shard_not_found(collection, shard_name))?;
            let leader = state
                .leader(collection, shard_name)
                .ok_or_else(|| Error::LeaderNotFound {
                    collection: collection.to_string(),
                    shard: shard_name.to_string(),
                })?;

            // Holding the leader lock orders updates against recovery
            let leader_core = self.core(&leader.node_name, &leader.core_name)?;
            let mut leader_guard = leader_core.lock().await;
            let mut updates = Vec::with_capacity(batch.len());
            for (id, body) in batch {
                let position = leader_guard.data.position() + 1;
                leader_guard.data.apply(id, body, position);
                updates.push((id.as_str(), body.as_str(), position));
            }

            for follower in shard.replicas.iter().filter(|r| {
                r.core_name != leader.core_name
                    && r.state != ReplicaState::Down
                    && state.is_live(&r.node_name)
            }) {
                match self.core(&follower.node_name, &follower.core_name) {
                    Ok(core) => {
                        let mut guard = core.lock().await;
                        for (id, body, position) in &updates {
                            guard.data.apply(id, body, *position);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(core = %follower.core_name, "update not forwarded: {}", e)
                    }
                }
            }
            accepted += updates.len();
        }
        Ok(accepted)
    }
}

/// Shard an id routes to
fn route<'a>(id: &str, shard_names: &'a [String]) -> Option<&'a str> {
    if shard_names.is_empty() {
        return None;
    }
    let hash = blake3::hash(id.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    let slot = u64::from_le_bytes(buf) % shard_names.len() as u64;
    shard_names.get(slot as usize).map(String::as_str)
}

#[async_trait]
impl NodeRuntime for LocalNodes {
    async fn instantiate_replica(&self, spec: &ReplicaSpec) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let node = nodes
            .get_mut(&spec.node_name)
            .filter(|n| n.up)
            .ok_or_else(|| Error::node_unavailable(&spec.node_name, "node is down"))?;
        if node.cores.contains_key(&spec.core_name) {
            return Err(Error::DuplicateCoreName(spec.core_name.clone()));
        }

        // Retained data is only taken once the core is certain to be created
        let data = match &spec.data_dir {
            Some(dir) => {
                let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
                retained.remove(dir).unwrap_or_default()
            }
            None => CoreData::new(),
        };
        let docs = data.len();
        node.cores.insert(
            spec.core_name.clone(),
            Arc::new(tokio::sync::Mutex::new(Core::new(
                &spec.collection,
                &spec.shard,
                spec.data_dir.clone(),
                data,
            ))),
        );

        tracing::debug!(node = %spec.node_name, core = %spec.core_name, docs, "core created");
        Ok(())
    }

    async fn recover_replica(&self, replica: &Replica, leader: Option<&Replica>) -> Result<()> {
        let target = self.core(&replica.node_name, &replica.core_name)?;
        target.lock().await.state = ReplicaState::Recovering;

        let delay = self.recovery_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        // The core may have been unloaded while we waited
        let target = self.core(&replica.node_name, &replica.core_name)?;

        match leader.filter(|l| l.core_name != replica.core_name) {
            Some(leader) => {
                let source = self.core(&leader.node_name, &leader.core_name)?;
                let source = source.lock().await;
                let mut core = target.lock().await;
                core.sync_from(&source.data);
                core.state = ReplicaState::Active;
                tracing::debug!(
                    core = %replica.core_name,
                    leader = %leader.core_name,
                    docs = core.data.len(),
                    "core recovered from leader"
                );
            }
            None => {
                target.lock().await.state = ReplicaState::Active;
            }
        }
        Ok(())
    }

    async fn tear_down_replica(&self, replica: &Replica, force: bool) -> Result<()> {
        let handle = {
            let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            let node = nodes
                .get(&replica.node_name)
                .filter(|n| n.up)
                .ok_or_else(|| Error::node_unavailable(&replica.node_name, "node is down"))?;
            match node.cores.get(&replica.core_name) {
                Some(core) => core.clone(),
                // Already gone
                None => return Ok(()),
            }
        };

        let retained = if force {
            handle.try_lock().ok().map(|core| (core.data_dir.clone(), core.data.clone()))
        } else {
            // Waits for in-flight writes
            let core = handle.lock().await;
            Some((core.data_dir.clone(), core.data.clone()))
        };

        {
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(node) = nodes.get_mut(&replica.node_name) {
                node.cores.remove(&replica.core_name);
            }
        }

        if let Some((Some(dir), data)) = retained {
            self.retained
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(dir, data);
        }

        tracing::debug!(node = %replica.node_name, core = %replica.core_name, force, "core unloaded");
        Ok(())
    }

    async fn replica_state(&self, replica: &Replica) -> Result<ReplicaState> {
        let core = self.core(&replica.node_name, &replica.core_name)?;
        let state = core.lock().await.state;
        Ok(state)
    }

    async fn replication_position(&self, replica: &Replica) -> Result<u64> {
        let core = self.core(&replica.node_name, &replica.core_name)?;
        let position = core.lock().await.data.position();
        Ok(position)
    }
}
