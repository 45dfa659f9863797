//! Leader election engine
//!
//! Per shard: `NoLeader -> ElectionPending -> HasLeader`.
//!
//! A reconcile loop follows topology snapshots and starts an election task
//! for every shard that lost (or never had) a valid leader while a replica
//! could take over. The task reads the shard record and the live node set
//! straight from the store, picks the most up-to-date eligible replica and
//! commits the new roles with a compare-and-swap on the shard key. Losing
//! the swap means someone else changed the shard; the task re-reads and
//! re-evaluates, so at most one outcome per failover is ever committed.
//!
//! Graceful removal and node loss take the same path: both show up as a
//! snapshot in which the leader is missing, down, or on a dead node.

use crate::common::{Backoff, CoordinatorConfig, CoordinatorMetrics, Result};
use crate::coordinator::paths;
use crate::coordinator::state::{encode, ClusterState, Replica, ReplicaRole, ReplicaState, Shard};
use crate::coordinator::topology::TopologyModel;
use crate::coordinator::txn;
use crate::metastore::{Commit, MetaStore};
use crate::node::NodeRuntime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionPhase {
    NoLeader,
    ElectionPending,
    HasLeader,
}

impl std::fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionPhase::NoLeader => write!(f, "no_leader"),
            ElectionPhase::ElectionPending => write!(f, "election_pending"),
            ElectionPhase::HasLeader => write!(f, "has_leader"),
        }
    }
}

type ShardId = (String, String);

struct ShardElection {
    phase: ElectionPhase,
    task: Option<JoinHandle<()>>,
    /// Set when something changed while the task was mid-attempt
    rerun: bool,
}

impl ShardElection {
    fn new() -> Self {
        Self {
            phase: ElectionPhase::NoLeader,
            task: None,
            rerun: false,
        }
    }
}

/// Result of one election attempt
enum Attempt {
    /// Shard record is gone
    Gone,
    /// No replicas at all
    Empty,
    /// A leader is in place; `active` if it is already serving
    Led { active: bool },
    /// Nobody can lead right now
    NoCandidate,
    /// Lost the compare-and-swap
    Conflict,
}

pub struct ElectionEngine {
    store: Arc<dyn MetaStore>,
    nodes: Arc<dyn NodeRuntime>,
    topology: Arc<TopologyModel>,
    config: CoordinatorConfig,
    metrics: Arc<CoordinatorMetrics>,
    shards: Mutex<HashMap<ShardId, ShardElection>>,
}

impl ElectionEngine {
    pub fn new(
        store: Arc<dyn MetaStore>,
        nodes: Arc<dyn NodeRuntime>,
        topology: Arc<TopologyModel>,
        config: CoordinatorConfig,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            store,
            nodes,
            topology,
            config,
            metrics,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// Current phase of a shard
    pub fn phase(&self, collection: &str, shard: &str) -> ElectionPhase {
        let shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        shards
            .get(&(collection.to_string(), shard.to_string()))
            .map_or(ElectionPhase::NoLeader, |e| e.phase)
    }

    /// Phase of every tracked shard
    pub fn phases(&self) -> BTreeMap<String, ElectionPhase> {
        let shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        shards
            .iter()
            .map(|((c, s), e)| (format!("{}/{}", c, s), e.phase))
            .collect()
    }

    /// Start the reconcile loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.topology.subscribe();
        tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                engine.reconcile(&state);
                if rx.changed().await.is_err() {
                    break;
                }
            }
            tracing::debug!("election loop stopped");
        })
    }

    /// Start an election for a shard now, without waiting for the snapshot
    /// to catch up.
    pub fn trigger(self: &Arc<Self>, collection: &str, shard: &str) {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        let id = (collection.to_string(), shard.to_string());
        let entry = shards.entry(id.clone()).or_insert_with(ShardElection::new);
        if entry.phase != ElectionPhase::HasLeader {
            entry.phase = ElectionPhase::ElectionPending;
        }
        self.ensure_task(id, entry);
    }

    /// Abort every election task.
    pub fn shutdown(&self) {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in shards.drain() {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
    }

    fn reconcile(self: &Arc<Self>, state: &ClusterState) {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());

        // Forget deleted shards
        shards.retain(|(c, s), entry| {
            let keep = state.shard(c, s).is_some();
            if !keep {
                if let Some(task) = entry.task.take() {
                    task.abort();
                }
            }
            keep
        });

        for collection in state.collections.values() {
            for shard in &collection.shards {
                let id = (collection.name().to_string(), shard.name.clone());
                let led = state.leader(collection.name(), &shard.name).is_some();
                let stale = shard
                    .replicas
                    .iter()
                    .any(|r| !state.is_live(&r.node_name) && (r.state != ReplicaState::Down || r.is_leader()));

                let entry = shards.entry(id.clone()).or_insert_with(ShardElection::new);

                if led {
                    if entry.phase != ElectionPhase::HasLeader && entry.task.is_none() {
                        entry.phase = ElectionPhase::HasLeader;
                    }
                    if stale {
                        // Mark replicas on dead nodes down
                        self.ensure_task(id, entry);
                    }
                    continue;
                }

                if entry.phase == ElectionPhase::HasLeader {
                    self.metrics.leaders_lost.inc();
                    tracing::info!(
                        collection = %id.0,
                        shard = %id.1,
                        epoch = shard.leader_epoch,
                        "shard lost its leader"
                    );
                }

                let eligible = shard.replicas.iter().any(|r| is_eligible(state, r));
                let had_leader = shard.leader_epoch > 0 || shard.leader().is_some();
                if eligible || (had_leader && !shard.replicas.is_empty()) || stale {
                    entry.phase = ElectionPhase::ElectionPending;
                    self.ensure_task(id, entry);
                } else {
                    entry.phase = ElectionPhase::NoLeader;
                }
            }
        }
    }

    /// Start the shard's task, or ask the running one to go round again.
    /// Called with the shard map locked.
    fn ensure_task(self: &Arc<Self>, id: ShardId, entry: &mut ShardElection) {
        if entry.task.is_some() {
            entry.rerun = true;
            return;
        }
        entry.rerun = false;
        self.metrics.elections_started.inc();
        tracing::debug!(collection = %id.0, shard = %id.1, "election started");
        let engine = Arc::clone(self);
        entry.task = Some(tokio::spawn(async move { engine.run(id).await }));
    }

    async fn run(self: Arc<Self>, id: ShardId) {
        let (collection, shard) = (&id.0, &id.1);
        let mut backoff = Backoff::new(self.config.election_backoff(), self.config.election_backoff_max());
        let mut rx = self.topology.subscribe();

        loop {
            let _ = rx.borrow_and_update();
            self.set_rerun(&id, false);

            let attempt = match self.attempt(collection, shard).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::warn!(collection = %collection, shard = %shard, "election attempt failed: {}", e);
                    Attempt::NoCandidate
                }
            };

            let settled = match attempt {
                Attempt::Gone => {
                    let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
                    shards.remove(&id);
                    return;
                }
                Attempt::Conflict => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Attempt::Empty => Some(ElectionPhase::NoLeader),
                Attempt::Led { active: true } => Some(ElectionPhase::HasLeader),
                Attempt::Led { active: false } => Some(ElectionPhase::ElectionPending),
                Attempt::NoCandidate => None,
            };

            if let Some(phase) = settled {
                let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
                let Some(entry) = shards.get_mut(&id) else {
                    return;
                };
                entry.phase = phase;
                if !entry.rerun {
                    entry.task = None;
                    return;
                }
                continue;
            }

            // Pending with nobody to elect: back off, wake early on any change
            tokio::select! {
                _ = tokio::time::sleep(backoff.next_delay()) => {}
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn set_rerun(&self, id: &ShardId, rerun: bool) {
        let mut shards = self.shards.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = shards.get_mut(id) {
            entry.rerun = rerun;
        }
    }

    async fn attempt(&self, collection: &str, shard_name: &str) -> Result<Attempt> {
        let Some(current) = txn::read_shard(self.store.as_ref(), collection, shard_name)? else {
            return Ok(Attempt::Gone);
        };
        if current.replicas.is_empty() {
            return Ok(Attempt::Empty);
        }
        let (live, _) = txn::list_live_nodes(self.store.as_ref())?;

        let mut next = current.clone();
        for replica in next.replicas.iter_mut() {
            if !live.contains_key(&replica.node_name) {
                replica.state = ReplicaState::Down;
                replica.role = ReplicaRole::Follower;
            }
        }

        let chosen = self.choose(&next, |r| live.contains_key(&r.node_name)).await;
        let previous = current.leader().map(|l| l.core_name.clone());

        match &chosen {
            Some(core) => {
                for replica in next.replicas.iter_mut() {
                    replica.role = if replica.core_name == *core {
                        ReplicaRole::Leader
                    } else {
                        ReplicaRole::Follower
                    };
                }
                if previous.as_ref() != Some(core) {
                    next.leader_epoch += 1;
                }
            }
            None => {
                for replica in next.replicas.iter_mut() {
                    replica.role = ReplicaRole::Follower;
                }
            }
        }

        let outcome = match &chosen {
            Some(core) => Attempt::Led {
                active: next.replica(core).is_some_and(|r| r.is_active()),
            },
            None => Attempt::NoCandidate,
        };

        if next == current {
            return Ok(outcome);
        }

        let key = paths::shard_key(collection, shard_name);
        match self.store.conditional_write(&key, encode(&next)?, current.version)? {
            Commit::Committed { revision } => {
                if let Some(core) = chosen.filter(|c| previous.as_ref() != Some(c)) {
                    self.metrics.elections_won.inc();
                    tracing::info!(
                        collection,
                        shard = shard_name,
                        leader = %core,
                        epoch = next.leader_epoch,
                        revision,
                        "leader elected"
                    );
                } else {
                    tracing::debug!(collection, shard = shard_name, revision, "shard roles updated");
                }
                if let Err(e) = self.topology.force_refresh(collection) {
                    tracing::warn!(collection, "refresh after election failed: {}", e);
                }
                Ok(outcome)
            }
            Commit::Conflict { current: found, .. } => {
                self.metrics.cas_conflicts.inc();
                tracing::debug!(
                    collection,
                    shard = shard_name,
                    expected = current.version,
                    found,
                    "election lost the race, re-reading"
                );
                Ok(Attempt::Conflict)
            }
        }
    }

    /// Pick the replica that should lead.
    ///
    /// Candidates are the active replicas on live nodes, or the recovering
    /// ones their node still reports as recovering when none is active. A
    /// current active leader keeps the role. Otherwise the highest
    /// replication position wins, ties going to the earliest registration.
    async fn choose<F>(&self, shard: &Shard, is_live: F) -> Option<String>
    where
        F: Fn(&Replica) -> bool,
    {
        let on_live = |state: ReplicaState| {
            shard
                .replicas
                .iter()
                .filter(|r| r.state == state && is_live(r))
                .collect::<Vec<&Replica>>()
        };
        let active = on_live(ReplicaState::Active);
        let degraded = active.is_empty();
        let mut candidates = if degraded {
            on_live(ReplicaState::Recovering)
        } else {
            active
        };
        if candidates.is_empty() {
            return None;
        }

        if degraded {
            // A recovery nobody drives any more never finishes; only keep
            // replicas their node still reports as making progress
            let reported = futures_util::future::join_all(candidates.iter().map(|r| async move {
                let state =
                    tokio::time::timeout(self.config.node_timeout(), self.nodes.replica_state(r)).await;
                matches!(state, Ok(Ok(ReplicaState::Recovering | ReplicaState::Active))).then_some(*r)
            }))
            .await;
            candidates = reported.into_iter().flatten().collect();
            if candidates.is_empty() {
                return None;
            }
        } else if let Some(leader) = candidates.iter().find(|r| r.is_leader()) {
            return Some(leader.core_name.clone());
        }

        let positions = futures_util::future::join_all(candidates.iter().map(|r| async move {
            let position = tokio::time::timeout(
                self.config.node_timeout(),
                self.nodes.replication_position(r),
            )
            .await;
            match position {
                Ok(Ok(position)) => Some((*r, position)),
                Ok(Err(e)) => {
                    tracing::warn!(core = %r.core_name, "skipping candidate: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!(core = %r.core_name, "skipping candidate: position query timed out");
                    None
                }
            }
        }))
        .await;

        positions
            .into_iter()
            .flatten()
            .max_by(|(a, pa), (b, pb)| pa.cmp(pb).then_with(|| b.registered_at.cmp(&a.registered_at)))
            .map(|(r, _)| r.core_name.clone())
    }
}

fn is_eligible(state: &ClusterState, replica: &Replica) -> bool {
    replica.state != ReplicaState::Down && state.is_live(&replica.node_name)
}
