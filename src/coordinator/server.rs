//! Coordinator
//!
//! Wires the topology model, election engine, admin processor and waiter
//! around one metadata store and one node runtime, and exposes the
//! coordinator API.

use crate::common::{CoordinatorConfig, CoordinatorMetrics, Error, Result};
use crate::coordinator::admin::{AddReplica, AdminProcessor, CreateCollection};
use crate::coordinator::election::{ElectionEngine, ElectionPhase};
use crate::coordinator::state::{ClusterState, CollectionProps, LiveNode, Replica};
use crate::coordinator::topology::TopologyModel;
use crate::coordinator::waiter::{Convergence, ConvergenceWaiter};
use crate::metastore::MetaStore;
use crate::node::NodeRuntime;
use futures_util::Stream;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub struct Coordinator {
    config: CoordinatorConfig,
    topology: Arc<TopologyModel>,
    elections: Arc<ElectionEngine>,
    admin: AdminProcessor,
    waiter: Arc<ConvergenceWaiter>,
    metrics: Arc<CoordinatorMetrics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator and start its background tasks. Must be called
    /// from within a Tokio runtime.
    pub fn start(
        config: CoordinatorConfig,
        store: Arc<dyn MetaStore>,
        nodes: Arc<dyn NodeRuntime>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(CoordinatorMetrics::new());

        let topology = Arc::new(TopologyModel::new(store.clone(), metrics.clone()));
        // Populate synchronously so callers see existing topology right away
        topology.refresh_all()?;

        let elections = Arc::new(ElectionEngine::new(
            store.clone(),
            nodes.clone(),
            topology.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let waiter = Arc::new(ConvergenceWaiter::new(topology.clone(), metrics.clone()));
        let admin = AdminProcessor::new(
            store,
            nodes,
            topology.clone(),
            elections.clone(),
            waiter.clone(),
            config.clone(),
            metrics.clone(),
        );

        let tasks = vec![topology.spawn_watcher(), elections.spawn()];
        tracing::info!(
            collections = topology.current_state().collections.len(),
            live_nodes = topology.current_state().live_nodes.len(),
            "coordinator started"
        );

        Ok(Self {
            config,
            topology,
            elections,
            admin,
            waiter,
            metrics,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    async fn timed<T>(&self, command: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let result = fut.await;
        self.metrics
            .record_command(command, started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(command, "command failed: {}", e);
        }
        result
    }

    // === Admin commands ===

    pub async fn create_collection(&self, req: CreateCollection) -> Result<CollectionProps> {
        self.timed("create_collection", self.admin.create_collection(&req))
            .await
    }

    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        self.timed("delete_collection", self.admin.delete_collection(name))
            .await
    }

    pub async fn add_replica(&self, req: AddReplica) -> Result<Replica> {
        self.timed("add_replica", self.admin.add_replica(&req)).await
    }

    pub async fn remove_replica(&self, core_name: &str, force: bool) -> Result<()> {
        self.timed("remove_replica", self.admin.remove_replica(core_name, force))
            .await
    }

    pub fn register_live_node(&self, node_name: &str, base_url: &str) -> Result<LiveNode> {
        self.admin.register_live_node(node_name, base_url)
    }

    pub fn unregister_live_node(&self, node_name: &str) -> Result<bool> {
        self.admin.unregister_live_node(node_name)
    }

    // === Topology ===

    pub fn current_state(&self) -> Arc<ClusterState> {
        self.topology.current_state()
    }

    pub fn force_refresh(&self, collection: &str) -> Result<Arc<ClusterState>> {
        self.topology.force_refresh(collection)
    }

    pub fn on_change(&self, collection: &str) -> impl Stream<Item = Arc<ClusterState>> + Send + 'static {
        self.topology.on_change(collection)
    }

    /// Leader of a shard in the current snapshot
    pub fn get_leader(&self, collection: &str, shard: &str) -> Result<Replica> {
        let state = self.current_state();
        if !state.has_collection(collection) {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        if state.shard(collection, shard).is_none() {
            return Err(Error::shard_not_found(collection, shard));
        }
        state
            .leader(collection, shard)
            .cloned()
            .ok_or_else(|| Error::LeaderNotFound {
                collection: collection.to_string(),
                shard: shard.to_string(),
            })
    }

    pub fn election_phase(&self, collection: &str, shard: &str) -> ElectionPhase {
        self.elections.phase(collection, shard)
    }

    /// Election phase of every shard seen so far, keyed `collection/shard`
    pub fn election_phases(&self) -> BTreeMap<String, ElectionPhase> {
        self.elections.phases()
    }

    // === Convergence ===

    pub async fn wait_for<P>(&self, collection: &str, timeout: Duration, predicate: P) -> Convergence
    where
        P: FnMut(&ClusterState) -> bool,
    {
        self.waiter.wait_for(collection, timeout, predicate).await
    }

    pub async fn wait_for_replica_absence(
        &self,
        collection: &str,
        core_name: &str,
        expected_shards: usize,
        timeout: Duration,
    ) -> Convergence {
        self.waiter
            .wait_for_replica_absence(collection, core_name, expected_shards, timeout)
            .await
    }

    pub async fn wait_for_replica_presence(
        &self,
        collection: &str,
        core_name: &str,
        timeout: Duration,
    ) -> Convergence {
        self.waiter
            .wait_for_replica_presence(collection, core_name, None, timeout)
            .await
    }

    pub async fn wait_for_recoveries(&self, collection: &str, timeout: Duration) -> Convergence {
        self.waiter.wait_for_recoveries(collection, timeout).await
    }

    pub async fn get_leader_retry(&self, collection: &str, shard: &str, timeout: Duration) -> Result<Replica> {
        self.waiter.get_leader_retry(collection, shard, timeout).await
    }

    pub async fn wait_for_leader_change(
        &self,
        collection: &str,
        shard: &str,
        old_core_url: &str,
        timeout: Duration,
    ) -> Result<Replica> {
        self.waiter
            .wait_for_leader_change(collection, shard, old_core_url, timeout)
            .await
    }

    /// Stop background tasks and pending elections.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.elections.shutdown();
        tracing::info!("coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.elections.shutdown();
    }
}
