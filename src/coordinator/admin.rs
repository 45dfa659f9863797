//! Admin command processor
//!
//! Every topology mutation is one conditional transaction built from a fresh
//! read of the keys it touches. Conflicts are retried by
//! [`txn::commit_with_retry`]; nothing is ever written without a version
//! check, and no command leaves the topology half applied.

use crate::common::{
    retry_with_backoff, validate_name, CoordinatorConfig, CoordinatorMetrics, Error, Result,
};
use crate::coordinator::election::ElectionEngine;
use crate::coordinator::paths;
use crate::coordinator::placement;
use crate::coordinator::state::{
    encode, CollectionProps, CoreClaim, LiveNode, Replica, ReplicaRole, ReplicaState, Shard,
};
use crate::coordinator::topology::TopologyModel;
use crate::coordinator::txn;
use crate::coordinator::waiter::ConvergenceWaiter;
use crate::metastore::{Commit, MetaStore, Op};
use crate::node::{NodeRuntime, ReplicaSpec};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Attempts for each node runtime call that may be retried
const NODE_CALL_ATTEMPTS: usize = 3;
const NODE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    #[serde(default = "default_config_name")]
    pub config_name: String,
    pub num_shards: usize,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
    /// Nodes to place replicas on; empty creates the shards bare
    #[serde(default)]
    pub node_set: Vec<String>,
}

fn default_config_name() -> String {
    "_default".to_string()
}

fn default_replication_factor() -> usize {
    1
}

impl CreateCollection {
    pub fn new(name: impl Into<String>, num_shards: usize) -> Self {
        Self {
            name: name.into(),
            config_name: default_config_name(),
            num_shards,
            replication_factor: default_replication_factor(),
            node_set: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replication_factor: usize, node_set: Vec<String>) -> Self {
        self.replication_factor = replication_factor;
        self.node_set = node_set;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReplica {
    pub collection: String,
    pub shard: String,
    pub core_name: String,
    pub node_name: String,
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl AddReplica {
    pub fn new(
        collection: impl Into<String>,
        shard: impl Into<String>,
        core_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            shard: shard.into(),
            core_name: core_name.into(),
            node_name: node_name.into(),
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<String>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}

pub struct AdminProcessor {
    store: Arc<dyn MetaStore>,
    nodes: Arc<dyn NodeRuntime>,
    topology: Arc<TopologyModel>,
    elections: Arc<ElectionEngine>,
    waiter: Arc<ConvergenceWaiter>,
    config: CoordinatorConfig,
    metrics: Arc<CoordinatorMetrics>,
}

impl AdminProcessor {
    pub fn new(
        store: Arc<dyn MetaStore>,
        nodes: Arc<dyn NodeRuntime>,
        topology: Arc<TopologyModel>,
        elections: Arc<ElectionEngine>,
        waiter: Arc<ConvergenceWaiter>,
        config: CoordinatorConfig,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            store,
            nodes,
            topology,
            elections,
            waiter,
            config,
            metrics,
        }
    }

    // === Collections ===

    pub async fn create_collection(&self, req: &CreateCollection) -> Result<CollectionProps> {
        validate_name("collection", &req.name)?;
        if req.num_shards == 0 {
            return Err(Error::InvalidArgument("num_shards must be at least 1".into()));
        }
        if !req.node_set.is_empty() && req.replication_factor == 0 {
            return Err(Error::InvalidArgument(
                "replication_factor must be at least 1 when a node set is given".into(),
            ));
        }

        let props = CollectionProps {
            name: req.name.clone(),
            config_name: req.config_name.clone(),
            replication_factor: req.replication_factor,
            shard_names: (1..=req.num_shards).map(|i| format!("shard{}", i)).collect(),
            created_at: Utc::now(),
        };

        // Plan before writing anything, so a dead node set fails cleanly
        let planned = if req.node_set.is_empty() {
            Vec::new()
        } else {
            let state = self.topology.refresh_live_nodes()?;
            placement::plan(
                &state,
                &req.name,
                &props.shard_names,
                req.replication_factor,
                &req.node_set,
            )?
        };

        let mut ops = vec![Op::Put {
            key: paths::collection_key(&req.name),
            value: encode(&props)?,
            expected: 0,
        }];
        for shard in &props.shard_names {
            ops.push(Op::Put {
                key: paths::shard_key(&req.name, shard),
                value: encode(&Shard::new(shard.as_str()))?,
                expected: 0,
            });
        }
        // Planned core names must still be free when the collection appears
        for planned_core in &planned {
            ops.push(Op::Check {
                key: paths::core_key(&planned_core.core_name(&req.name)),
                expected: 0,
            });
        }

        match self.store.transact(ops)? {
            Commit::Committed { revision } => {
                tracing::info!(
                    collection = %req.name,
                    shards = req.num_shards,
                    revision,
                    "collection created"
                );
            }
            Commit::Conflict { key, .. } => {
                return Err(match paths::core_of(&key) {
                    Some(core) => Error::DuplicateCoreName(core),
                    None => Error::CollectionExists(req.name.clone()),
                });
            }
        }
        self.topology.force_refresh(&req.name)?;

        if !planned.is_empty() {
            let adds = planned.iter().map(|p| {
                let add = AddReplica::new(&req.name, &p.shard, p.core_name(&req.name), &p.node_name);
                async move { self.add_replica(&add).await }
            });
            // Every add runs to the end, so none is left half way through
            // recovery when a sibling fails
            let results = futures_util::future::join_all(adds).await;
            if let Some(e) = results.into_iter().find_map(|r| r.err()) {
                tracing::warn!(collection = %req.name, "replica placement incomplete: {}", e);
                return Err(e);
            }
        }

        Ok(props)
    }

    /// Tear down every replica and remove the collection with all its core
    /// claims.
    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        let Some((props, _)) = txn::read_props(self.store.as_ref(), name)? else {
            return Err(Error::CollectionNotFound(name.to_string()));
        };

        let (live, _) = txn::list_live_nodes(self.store.as_ref())?;
        for shard_name in &props.shard_names {
            let Some(shard) = txn::read_shard(self.store.as_ref(), name, shard_name)? else {
                continue;
            };
            for replica in shard.replicas.iter().filter(|r| live.contains_key(&r.node_name)) {
                if let Err(e) = self.node_call(self.nodes.tear_down_replica(replica, true)).await {
                    tracing::warn!(core = %replica.core_name, "teardown failed, removing anyway: {}", e);
                }
            }
        }

        let store = self.store.as_ref();
        txn::commit_with_retry(store, &self.config, &self.metrics, "delete_collection", || {
            let ops = delete_collection_ops(store, name);
            async move { ops }
        })
        .await?;

        tracing::info!(collection = name, "collection deleted");
        self.topology.force_refresh(name)?;
        Ok(())
    }

    // === Replicas ===

    pub async fn add_replica(&self, req: &AddReplica) -> Result<Replica> {
        validate_name("core", &req.core_name)?;
        validate_name("node", &req.node_name)?;

        let Some((node, _)) = txn::read_live_node(self.store.as_ref(), &req.node_name)? else {
            return Err(Error::node_unavailable(&req.node_name, "no liveness registration"));
        };

        let store = self.store.as_ref();
        let mut registered: Option<Replica> = None;
        txn::commit_with_retry(store, &self.config, &self.metrics, "add_replica", || {
            let ops = register_ops(store, req, &node).map(|(replica, ops)| {
                registered = Some(replica);
                Some(ops)
            });
            async move { ops }
        })
        .await?;
        let replica = registered.ok_or_else(|| Error::Internal("replica not registered".into()))?;

        tracing::info!(
            collection = %req.collection,
            shard = %req.shard,
            core = %req.core_name,
            node = %req.node_name,
            "replica registered"
        );
        self.topology.force_refresh(&req.collection)?;

        let spec = ReplicaSpec {
            core_name: req.core_name.clone(),
            collection: req.collection.clone(),
            shard: req.shard.clone(),
            node_name: req.node_name.clone(),
            data_dir: req.data_dir.clone(),
        };
        let created = retry_with_backoff(
            || self.node_call(self.nodes.instantiate_replica(&spec)),
            NODE_CALL_ATTEMPTS,
            NODE_RETRY_DELAY,
        )
        .await;
        if let Err(e) = created {
            tracing::warn!(core = %req.core_name, "instantiation failed, replica stays down: {}", e);
            return Err(Error::node_unavailable(&req.node_name, e));
        }

        self.set_state(&req.collection, &req.shard, &req.core_name, ReplicaState::Recovering)
            .await?;

        let leader = match self.leader_for(&req.collection, &req.shard, &req.core_name).await {
            Ok(leader) => leader,
            Err(e) => {
                self.set_state(&req.collection, &req.shard, &req.core_name, ReplicaState::Down)
                    .await?;
                return Err(e);
            }
        };

        if let Err(e) = self.recover(&replica, leader.as_ref()).await {
            tracing::warn!(core = %req.core_name, "recovery failed: {}", e);
            self.set_state(&req.collection, &req.shard, &req.core_name, ReplicaState::Down)
                .await?;
            return Err(Error::node_unavailable(&req.node_name, e));
        }

        let active = self
            .set_state(&req.collection, &req.shard, &req.core_name, ReplicaState::Active)
            .await?
            .ok_or_else(|| Error::ReplicaNotFound(req.core_name.clone()))?;
        self.elections.trigger(&req.collection, &req.shard);

        tracing::info!(
            core = %req.core_name,
            leader = leader.as_ref().map(|l| l.core_name.as_str()).unwrap_or("-"),
            "replica active"
        );
        Ok(active)
    }

    pub async fn remove_replica(&self, core_name: &str, force: bool) -> Result<()> {
        let Some((claim, _)) = txn::read_claim(self.store.as_ref(), core_name)? else {
            return Err(Error::ReplicaNotFound(core_name.to_string()));
        };
        let CoreClaim { collection, shard } = claim;
        let replica = txn::read_shard(self.store.as_ref(), &collection, &shard)?
            .and_then(|s| s.replica(core_name).cloned())
            .ok_or_else(|| Error::ReplicaNotFound(core_name.to_string()))?;

        if !force && replica.state == ReplicaState::Recovering {
            let finished = self
                .waiter
                .wait_for(&collection, self.config.recovery_grace(), |state| {
                    state
                        .shard(&collection, &shard)
                        .and_then(|s| s.replica(core_name))
                        .map_or(true, |r| r.state != ReplicaState::Recovering)
                })
                .await;
            if !finished.converged {
                tracing::warn!(
                    core = core_name,
                    grace = ?self.config.recovery_grace(),
                    "recovery still running, unloading anyway"
                );
            }
        }

        if txn::read_live_node(self.store.as_ref(), &replica.node_name)?.is_some() {
            let torn_down = self
                .node_call(self.nodes.tear_down_replica(&replica, force))
                .await;
            match torn_down {
                Ok(()) => {}
                Err(e) if force => {
                    tracing::warn!(core = core_name, node = %replica.node_name, "forced unload, ignoring teardown failure: {}", e)
                }
                Err(e) => return Err(Error::node_unavailable(&replica.node_name, e)),
            }
        } else {
            tracing::debug!(core = core_name, node = %replica.node_name, "node not live, skipping teardown");
        }

        let store = self.store.as_ref();
        let mut was_leader = false;
        txn::commit_with_retry(store, &self.config, &self.metrics, "remove_replica", || {
            let ops = unregister_ops(store, core_name).map(|built| {
                built.map(|(leader, ops)| {
                    was_leader = leader;
                    ops
                })
            });
            async move { ops }
        })
        .await?;

        tracing::info!(
            collection = %collection,
            shard = %shard,
            core = core_name,
            was_leader,
            "replica removed"
        );
        self.topology.force_refresh(&collection)?;
        if was_leader {
            self.elections.trigger(&collection, &shard);
        }
        Ok(())
    }

    // === Live nodes ===

    pub fn register_live_node(&self, node_name: &str, base_url: &str) -> Result<LiveNode> {
        validate_name("node", node_name)?;
        let node = LiveNode {
            node_name: node_name.to_string(),
            base_url: base_url.to_string(),
            registered_at: Utc::now(),
        };
        txn::put_live_node(self.store.as_ref(), &node)?;
        tracing::info!(node = node_name, url = base_url, "node registered");
        self.topology.refresh_live_nodes()?;
        Ok(node)
    }

    pub fn unregister_live_node(&self, node_name: &str) -> Result<bool> {
        let removed = txn::delete_live_node(self.store.as_ref(), node_name)?;
        if removed {
            tracing::info!(node = node_name, "node unregistered");
            self.topology.refresh_live_nodes()?;
        }
        Ok(removed)
    }

    // === Helpers ===

    async fn node_call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.node_timeout(), call)
            .await
            .map_err(|_| Error::Timeout(format!("node call exceeded {:?}", self.config.node_timeout())))?
    }

    /// Rewrite one replica's state. `None` if the replica is gone.
    async fn set_state(
        &self,
        collection: &str,
        shard: &str,
        core_name: &str,
        state: ReplicaState,
    ) -> Result<Option<Replica>> {
        let store = self.store.as_ref();
        let mut updated: Option<Replica> = None;
        txn::commit_with_retry(store, &self.config, &self.metrics, "set_state", || {
            let ops = state_ops(store, collection, shard, core_name, state).map(|built| {
                built.map(|(replica, ops)| {
                    updated = Some(replica.clone());
                    ops
                })
            });
            // Unchanged or gone: report what the store holds
            if matches!(ops, Ok(None)) {
                updated = txn::read_shard(store, collection, shard)
                    .ok()
                    .flatten()
                    .and_then(|s| s.replica(core_name).cloned());
            }
            async move { ops }
        })
        .await?;

        if updated.is_some() {
            tracing::debug!(core = core_name, %state, "replica state updated");
            self.topology.force_refresh(collection)?;
        }
        Ok(updated)
    }

    /// Leader the new replica should sync from. `None` means the replica is
    /// alone and bootstraps on its own data.
    async fn leader_for(&self, collection: &str, shard: &str, core_name: &str) -> Result<Option<Replica>> {
        let state = self.topology.force_refresh(collection)?;
        if let Some(leader) = state.leader(collection, shard).filter(|l| l.core_name != core_name) {
            return Ok(Some(leader.clone()));
        }

        let others_active = state.shard(collection, shard).is_some_and(|s| {
            s.replicas
                .iter()
                .any(|r| r.core_name != core_name && r.is_active() && state.is_live(&r.node_name))
        });
        if !others_active {
            return Ok(None);
        }

        // Someone else holds the data; wait for them to be elected
        tracing::debug!(collection, shard, core = core_name, "waiting for a leader to sync from");
        self.waiter
            .get_leader_retry(collection, shard, self.config.node_timeout())
            .await
            .map(Some)
    }

    /// Sync the replica and wait for its node to report it active.
    async fn recover(&self, replica: &Replica, leader: Option<&Replica>) -> Result<()> {
        self.node_call(self.nodes.recover_replica(replica, leader)).await?;

        let deadline = tokio::time::Instant::now() + self.config.node_timeout();
        let mut backoff = crate::common::Backoff::new(Duration::from_millis(5), Duration::from_millis(200));
        loop {
            if self.node_call(self.nodes.replica_state(replica)).await? == ReplicaState::Active {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout(format!("{} did not become active", replica.core_name)));
            }
            backoff.wait().await;
        }
    }
}

/// Register a replica `down` and claim its core name, in one transaction.
fn register_ops(store: &dyn MetaStore, req: &AddReplica, node: &LiveNode) -> Result<(Replica, Vec<Op>)> {
    validate_name("shard", &req.shard)?;
    if txn::read_props(store, &req.collection)?.is_none() {
        return Err(Error::CollectionNotFound(req.collection.clone()));
    }
    let mut shard = txn::read_shard(store, &req.collection, &req.shard)?
        .ok_or_else(|| Error::shard_not_found(&req.collection, &req.shard))?;
    if txn::read_claim(store, &req.core_name)?.is_some() {
        return Err(Error::DuplicateCoreName(req.core_name.clone()));
    }

    let replica = Replica {
        core_name: req.core_name.clone(),
        node_name: req.node_name.clone(),
        base_url: node.base_url.clone(),
        role: ReplicaRole::Follower,
        state: ReplicaState::Down,
        data_dir: req.data_dir.clone(),
        registered_at: shard.next_registration,
    };
    shard.next_registration += 1;
    shard.replicas.push(replica.clone());

    let claim = CoreClaim {
        collection: req.collection.clone(),
        shard: req.shard.clone(),
    };
    let ops = vec![
        Op::Put {
            key: paths::shard_key(&req.collection, &req.shard),
            value: encode(&shard)?,
            expected: shard.version,
        },
        Op::Put {
            key: paths::core_key(&req.core_name),
            value: encode(&claim)?,
            expected: 0,
        },
    ];
    Ok((replica, ops))
}

/// Drop a replica from its shard and release its core name. Yields whether
/// it was the leader, or `None` if the claim is already gone.
fn unregister_ops(store: &dyn MetaStore, core_name: &str) -> Result<Option<(bool, Vec<Op>)>> {
    let Some((claim, claim_version)) = txn::read_claim(store, core_name)? else {
        return Ok(None);
    };

    let mut ops = Vec::with_capacity(2);
    let mut was_leader = false;
    if let Some(mut shard) = txn::read_shard(store, &claim.collection, &claim.shard)? {
        if let Some(pos) = shard.replicas.iter().position(|r| r.core_name == core_name) {
            let removed = shard.replicas.remove(pos);
            was_leader = removed.is_leader();
            ops.push(Op::Put {
                key: paths::shard_key(&claim.collection, &claim.shard),
                value: encode(&shard)?,
                expected: shard.version,
            });
        }
    }
    ops.push(Op::Delete {
        key: paths::core_key(core_name),
        expected: claim_version,
    });
    Ok(Some((was_leader, ops)))
}

/// Set one replica's state. `None` when there is nothing to write.
fn state_ops(
    store: &dyn MetaStore,
    collection: &str,
    shard_name: &str,
    core_name: &str,
    state: ReplicaState,
) -> Result<Option<(Replica, Vec<Op>)>> {
    let Some(mut shard) = txn::read_shard(store, collection, shard_name)? else {
        return Ok(None);
    };
    let Some(replica) = shard.replica_mut(core_name) else {
        return Ok(None);
    };
    if replica.state == state {
        return Ok(None);
    }
    replica.state = state;
    let updated = replica.clone();

    let ops = vec![Op::Put {
        key: paths::shard_key(collection, shard_name),
        value: encode(&shard)?,
        expected: shard.version,
    }];
    Ok(Some((updated, ops)))
}

/// Delete every key of a collection and the claims of its cores.
fn delete_collection_ops(store: &dyn MetaStore, name: &str) -> Result<Option<Vec<Op>>> {
    let listing = store.list(&paths::collection_prefix(name))?;
    if listing.entries.is_empty() {
        return Err(Error::CollectionNotFound(name.to_string()));
    }

    let mut ops = Vec::new();
    let shards_prefix = format!("{}shards/", paths::collection_prefix(name));
    for (key, entry) in &listing.entries {
        if key.starts_with(&shards_prefix) {
            let shard: Shard = crate::coordinator::state::decode(key, &entry.value)?;
            for replica in &shard.replicas {
                if let Some((claim, version)) = txn::read_claim(store, &replica.core_name)? {
                    if claim.collection == name {
                        ops.push(Op::Delete {
                            key: paths::core_key(&replica.core_name),
                            expected: version,
                        });
                    }
                }
            }
        }
        ops.push(Op::Delete {
            key: key.clone(),
            expected: entry.version,
        });
    }
    Ok(Some(ops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::MemoryStore;

    fn live(store: &MemoryStore, node: &str) -> LiveNode {
        let node = LiveNode {
            node_name: node.into(),
            base_url: format!("http://{}/solr", node),
            registered_at: Utc::now(),
        };
        txn::put_live_node(store, &node).unwrap();
        node
    }

    fn bare_collection(store: &MemoryStore, name: &str) {
        let props = CollectionProps {
            name: name.into(),
            config_name: "conf1".into(),
            replication_factor: 1,
            shard_names: vec!["shard1".into()],
            created_at: Utc::now(),
        };
        store
            .transact(vec![
                Op::Put {
                    key: paths::collection_key(name),
                    value: encode(&props).unwrap(),
                    expected: 0,
                },
                Op::Put {
                    key: paths::shard_key(name, "shard1"),
                    value: encode(&Shard::new("shard1")).unwrap(),
                    expected: 0,
                },
            ])
            .unwrap();
    }

    #[test]
    fn test_register_ops_errors() {
        let store = MemoryStore::default();
        let node = live(&store, "n1");

        let req = AddReplica::new("c", "shard1", "core1", "n1");
        assert!(matches!(
            register_ops(&store, &req, &node),
            Err(Error::CollectionNotFound(_))
        ));

        bare_collection(&store, "c");
        let missing = AddReplica::new("c", "shard9", "core1", "n1");
        assert!(matches!(
            register_ops(&store, &missing, &node),
            Err(Error::ShardNotFound { .. })
        ));

        let (replica, ops) = register_ops(&store, &req, &node).unwrap();
        assert_eq!(replica.state, ReplicaState::Down);
        assert_eq!(replica.registered_at, 1);
        assert!(store.transact(ops).unwrap().is_committed());

        assert!(matches!(
            register_ops(&store, &req, &node),
            Err(Error::DuplicateCoreName(_))
        ));
    }

    #[test]
    fn test_unregister_keeps_shard() {
        let store = MemoryStore::default();
        let node = live(&store, "n1");
        bare_collection(&store, "c");
        let (_, ops) = register_ops(&store, &AddReplica::new("c", "shard1", "core1", "n1"), &node).unwrap();
        store.transact(ops).unwrap();

        let (was_leader, ops) = unregister_ops(&store, "core1").unwrap().unwrap();
        assert!(!was_leader);
        assert!(store.transact(ops).unwrap().is_committed());

        let shard = txn::read_shard(&store, "c", "shard1").unwrap().unwrap();
        assert!(shard.replicas.is_empty());
        assert_eq!(shard.next_registration, 2);
        assert!(txn::read_claim(&store, "core1").unwrap().is_none());
        assert!(unregister_ops(&store, "core1").unwrap().is_none());
    }

    #[test]
    fn test_state_ops_noop_when_unchanged() {
        let store = MemoryStore::default();
        let node = live(&store, "n1");
        bare_collection(&store, "c");
        let (_, ops) = register_ops(&store, &AddReplica::new("c", "shard1", "core1", "n1"), &node).unwrap();
        store.transact(ops).unwrap();

        assert!(state_ops(&store, "c", "shard1", "core1", ReplicaState::Down)
            .unwrap()
            .is_none());
        let (replica, _) = state_ops(&store, "c", "shard1", "core1", ReplicaState::Active)
            .unwrap()
            .unwrap();
        assert!(replica.is_active());
    }

    #[test]
    fn test_delete_collection_ops_release_claims() {
        let store = MemoryStore::default();
        let node = live(&store, "n1");
        bare_collection(&store, "c");
        let (_, ops) = register_ops(&store, &AddReplica::new("c", "shard1", "core1", "n1"), &node).unwrap();
        store.transact(ops).unwrap();

        let ops = delete_collection_ops(&store, "c").unwrap().unwrap();
        assert!(store.transact(ops).unwrap().is_committed());
        assert!(store.list(&paths::collection_prefix("c")).unwrap().entries.is_empty());
        assert!(txn::read_claim(&store, "core1").unwrap().is_none());
        assert!(matches!(
            delete_collection_ops(&store, "c"),
            Err(Error::CollectionNotFound(_))
        ));
    }
}
