//! Convergence waiter
//!
//! Blocks a caller until a predicate over a topology snapshot holds or a
//! deadline passes. The predicate is always evaluated against one whole
//! snapshot: first the current one, then every snapshot in which the watched
//! collection changed.

use crate::common::{CoordinatorMetrics, Error, Result};
use crate::coordinator::state::{ClusterState, Replica, ReplicaState};
use crate::coordinator::topology::TopologyModel;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline used when the requested timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Outcome of a wait
#[derive(Debug, Clone)]
pub struct Convergence {
    pub collection: String,
    /// Satisfying snapshot, or the last one observed before the deadline
    pub state: Arc<ClusterState>,
    pub converged: bool,
    pub elapsed: Duration,
}

impl Convergence {
    /// Turn a missed deadline into `Error::Timeout`.
    pub fn into_result(self) -> Result<Arc<ClusterState>> {
        if self.converged {
            Ok(self.state)
        } else {
            Err(Error::Timeout(format!(
                "collection {} did not converge within {:?}",
                self.collection, self.elapsed
            )))
        }
    }
}

/// Keeps the active waiter gauge honest when a wait is dropped mid-flight
struct ActiveWait<'a>(&'a CoordinatorMetrics);

impl<'a> ActiveWait<'a> {
    fn new(metrics: &'a CoordinatorMetrics) -> Self {
        metrics.active_waiters.inc();
        Self(metrics)
    }
}

impl Drop for ActiveWait<'_> {
    fn drop(&mut self) {
        self.0.active_waiters.dec();
    }
}

pub struct ConvergenceWaiter {
    topology: Arc<TopologyModel>,
    metrics: Arc<CoordinatorMetrics>,
}

impl ConvergenceWaiter {
    pub fn new(topology: Arc<TopologyModel>, metrics: Arc<CoordinatorMetrics>) -> Self {
        Self { topology, metrics }
    }

    /// Wait until `predicate` holds for a snapshot of `collection`.
    pub async fn wait_for<P>(&self, collection: &str, timeout: Duration, mut predicate: P) -> Convergence
    where
        P: FnMut(&ClusterState) -> bool,
    {
        let started = Instant::now();
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let _active = ActiveWait::new(&self.metrics);

        // Subscribe before the first evaluation
        let mut watch = self.topology.watch_collection(collection);
        let mut state = watch.latest();

        let mut converged = predicate(&state);
        while !converged {
            match tokio::time::timeout_at(deadline, watch.changed()).await {
                Ok(Some(next)) => {
                    state = next;
                    converged = predicate(&state);
                }
                Ok(None) | Err(_) => break,
            }
        }

        let elapsed = started.elapsed();
        if !converged {
            self.metrics.waits_timed_out.inc();
            tracing::debug!(collection, ?elapsed, "wait timed out");
        }
        Convergence {
            collection: collection.to_string(),
            state,
            converged,
            elapsed,
        }
    }

    /// Converges once the collection has exactly `expected_shards` shards and
    /// `core_name` is in none of them.
    pub async fn wait_for_replica_absence(
        &self,
        collection: &str,
        core_name: &str,
        expected_shards: usize,
        timeout: Duration,
    ) -> Convergence {
        self.wait_for(collection, timeout, |state| {
            state.collection(collection).is_some_and(|c| {
                c.shard_count() == expected_shards && !c.contains_core(core_name)
            })
        })
        .await
    }

    /// Converges once `core_name` is present in the collection in `wanted`
    /// state (any state if `None`).
    pub async fn wait_for_replica_presence(
        &self,
        collection: &str,
        core_name: &str,
        wanted: Option<ReplicaState>,
        timeout: Duration,
    ) -> Convergence {
        self.wait_for(collection, timeout, |state| {
            state.collection(collection).is_some_and(|c| {
                c.replicas().any(|(_, r)| {
                    r.core_name == core_name && wanted.map_or(true, |w| r.state == w)
                })
            })
        })
        .await
    }

    /// Converges once every replica on a live node is active and every shard
    /// holding such a replica has a leader.
    pub async fn wait_for_recoveries(&self, collection: &str, timeout: Duration) -> Convergence {
        self.wait_for(collection, timeout, |state| {
            let Some(c) = state.collection(collection) else {
                return false;
            };
            c.shards.iter().all(|shard| {
                let mut live = shard.replicas.iter().filter(|r| state.is_live(&r.node_name)).peekable();
                if live.peek().is_none() {
                    return true;
                }
                live.all(|r| r.is_active()) && state.leader(collection, &shard.name).is_some()
            })
        })
        .await
    }

    /// Leader of a shard, waiting up to `timeout` for one to appear.
    pub async fn get_leader_retry(&self, collection: &str, shard: &str, timeout: Duration) -> Result<Replica> {
        let convergence = self
            .wait_for(collection, timeout, |state| state.leader(collection, shard).is_some())
            .await;
        leader_of(&convergence, collection, shard)
    }

    /// Wait for a shard led by something other than `old_core_url`.
    pub async fn wait_for_leader_change(
        &self,
        collection: &str,
        shard: &str,
        old_core_url: &str,
        timeout: Duration,
    ) -> Result<Replica> {
        let convergence = self
            .wait_for(collection, timeout, |state| {
                state
                    .leader(collection, shard)
                    .is_some_and(|l| l.core_url() != old_core_url)
            })
            .await;
        leader_of(&convergence, collection, shard)
    }
}

fn leader_of(convergence: &Convergence, collection: &str, shard: &str) -> Result<Replica> {
    if !convergence.converged {
        return Err(Error::LeaderNotFound {
            collection: collection.to_string(),
            shard: shard.to_string(),
        });
    }
    convergence
        .state
        .leader(collection, shard)
        .cloned()
        .ok_or_else(|| Error::LeaderNotFound {
            collection: collection.to_string(),
            shard: shard.to_string(),
        })
}
