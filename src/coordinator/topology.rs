//! Topology model
//!
//! Read-through cache of the cluster topology. The current snapshot lives in a
//! `tokio::sync::watch` channel and is replaced wholesale (copy-on-write) on
//! every refresh, so readers never observe a half-applied collection.
//!
//! Refreshes always re-fetch the full key range of one collection and are
//! discarded when the fetched store revision is not newer than the one already
//! applied. Duplicate, late or out-of-order notifications are therefore no-ops.

use crate::common::{CoordinatorMetrics, Result};
use crate::coordinator::paths;
use crate::coordinator::state::{decode, ClusterState, Collection, CollectionProps, Shard};
use crate::coordinator::txn;
use crate::metastore::{MetaStore, Revision, WatchEvent};
use futures_util::Stream;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct TopologyModel {
    store: Arc<dyn MetaStore>,
    snapshot: watch::Sender<Arc<ClusterState>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl TopologyModel {
    pub fn new(store: Arc<dyn MetaStore>, metrics: Arc<CoordinatorMetrics>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ClusterState::default()));
        Self {
            store,
            snapshot,
            metrics,
        }
    }

    /// Latest known snapshot
    pub fn current_state(&self) -> Arc<ClusterState> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every snapshot replacement
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.snapshot.subscribe()
    }

    /// Watch one collection. The returned watch starts at the current
    /// snapshot; any later change to the collection (or to the live node set)
    /// wakes it.
    pub fn watch_collection(&self, collection: &str) -> CollectionWatch {
        let mut rx = self.snapshot.subscribe();
        let latest = rx.borrow_and_update().clone();
        CollectionWatch {
            seen: latest.watch_key(collection),
            collection: collection.to_string(),
            latest,
            rx,
        }
    }

    /// Stream yielding a snapshot each time `collection` changes
    pub fn on_change(&self, collection: &str) -> impl Stream<Item = Arc<ClusterState>> + Send + 'static {
        let mut watch = self.watch_collection(collection);
        async_stream::stream! {
            while let Some(state) = watch.changed().await {
                yield state;
            }
        }
    }

    /// Synchronously re-fetch one collection from the store
    pub fn force_refresh(&self, collection: &str) -> Result<Arc<ClusterState>> {
        let (fetched, revision) = self.fetch_collection(collection)?;
        self.metrics.topology_refreshes.inc();
        self.apply_collection(collection, fetched, revision);
        Ok(self.current_state())
    }

    /// Synchronously re-fetch the live node set
    pub fn refresh_live_nodes(&self) -> Result<Arc<ClusterState>> {
        let (nodes, revision) = txn::list_live_nodes(self.store.as_ref())?;
        self.snapshot.send_if_modified(|state| {
            if revision <= state.live_nodes_revision || state.live_nodes == nodes {
                // Still record the revision so later stale listings are ignored
                if revision > state.live_nodes_revision {
                    let mut next = (**state).clone();
                    next.live_nodes_revision = revision;
                    *state = Arc::new(next);
                }
                return false;
            }
            let mut next = (**state).clone();
            next.live_nodes = nodes.clone();
            next.live_nodes_revision = revision;
            next.version += 1;
            tracing::debug!(live = next.live_nodes.len(), revision, "live nodes changed");
            *state = Arc::new(next);
            true
        });
        Ok(self.current_state())
    }

    /// Rebuild every collection and the live node set
    pub fn refresh_all(&self) -> Result<Arc<ClusterState>> {
        self.refresh_live_nodes()?;

        let listing = self.store.list(paths::COLLECTIONS_ROOT)?;
        let mut names: Vec<String> = listing
            .entries
            .iter()
            .filter_map(|(key, _)| paths::collection_of(key))
            .collect();
        names.dedup();
        // Collections that vanished since the last refresh
        for cached in self.current_state().collections.keys() {
            if !names.contains(cached) {
                names.push(cached.clone());
            }
        }

        for name in names {
            self.force_refresh(&name)?;
        }
        Ok(self.current_state())
    }

    fn fetch_collection(&self, collection: &str) -> Result<(Option<Collection>, Revision)> {
        let listing = self.store.list(&paths::collection_prefix(collection))?;
        let props_key = paths::collection_key(collection);

        let mut props: Option<CollectionProps> = None;
        let mut shards: BTreeMap<String, Shard> = BTreeMap::new();
        for (key, entry) in &listing.entries {
            if *key == props_key {
                props = Some(decode(key, &entry.value)?);
            } else {
                let mut shard: Shard = decode(key, &entry.value)?;
                shard.version = entry.version;
                shards.insert(shard.name.clone(), shard);
            }
        }

        // Without its properties key the collection does not exist
        let Some(props) = props else {
            return Ok((None, listing.revision));
        };

        let ordered = props
            .shard_names
            .iter()
            .filter_map(|name| shards.remove(name))
            .collect();

        Ok((
            Some(Collection {
                props,
                shards: ordered,
                revision: listing.revision,
            }),
            listing.revision,
        ))
    }

    fn apply_collection(&self, name: &str, fetched: Option<Collection>, revision: Revision) {
        self.snapshot.send_if_modified(|state| {
            if state.collection_revision(name).is_some_and(|seen| seen >= revision) {
                return false;
            }

            let unchanged = match (&fetched, state.collections.get(name)) {
                (Some(new), Some(old)) => new.props == old.props && new.shards == old.shards,
                (None, None) => true,
                _ => false,
            };

            let mut next = (**state).clone();
            next.observed.insert(name.to_string(), revision);
            if unchanged {
                // Keep the guard current without waking anyone
                *state = Arc::new(next);
                return false;
            }

            match fetched.clone() {
                Some(collection) => {
                    tracing::debug!(
                        collection = name,
                        revision,
                        shards = collection.shard_count(),
                        "collection refreshed"
                    );
                    next.collections.insert(name.to_string(), Arc::new(collection));
                }
                None => {
                    tracing::debug!(collection = name, revision, "collection removed");
                    next.collections.remove(name);
                }
            }
            next.version += 1;
            *state = Arc::new(next);
            true
        });
    }

    /// Start the background task that follows store notifications.
    ///
    /// The store watches are registered before the initial full refresh, so no
    /// change committed in between is lost.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let mut collections = self.store.watch(paths::COLLECTIONS_ROOT);
        let mut nodes = self.store.watch(paths::LIVE_NODES_ROOT);
        let model = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = model.refresh_all() {
                tracing::error!("initial topology refresh failed: {}", e);
            }

            loop {
                tokio::select! {
                    event = collections.recv() => match event {
                        Some(WatchEvent::Changed(event)) => {
                            let Some(name) = paths::collection_of(&event.key) else {
                                continue;
                            };
                            let seen = model.current_state().collection_revision(&name);
                            if seen.is_some_and(|seen| seen >= event.revision) {
                                continue;
                            }
                            if let Err(e) = model.force_refresh(&name) {
                                tracing::warn!(collection = %name, "topology refresh failed: {}", e);
                            }
                        }
                        Some(WatchEvent::Lagged(skipped)) => {
                            tracing::warn!(skipped, "collection watch lagged, resyncing");
                            model.metrics.watch_resyncs.inc();
                            if let Err(e) = model.refresh_all() {
                                tracing::warn!("topology resync failed: {}", e);
                            }
                        }
                        None => break,
                    },
                    event = nodes.recv() => match event {
                        Some(WatchEvent::Changed(_)) | Some(WatchEvent::Lagged(_)) => {
                            if let Err(e) = model.refresh_live_nodes() {
                                tracing::warn!("live node refresh failed: {}", e);
                            }
                        }
                        None => break,
                    },
                }
            }

            tracing::debug!("topology watcher stopped");
        })
    }
}

/// Change subscription for one collection. Dropping it unsubscribes.
pub struct CollectionWatch {
    rx: watch::Receiver<Arc<ClusterState>>,
    collection: String,
    seen: (Option<Revision>, Revision),
    latest: Arc<ClusterState>,
}

impl CollectionWatch {
    /// Snapshot most recently observed by this watch
    pub fn latest(&self) -> Arc<ClusterState> {
        self.latest.clone()
    }

    /// Wait for the next snapshot in which the collection (or the live node
    /// set) differs from the last one observed. `None` once the model is gone.
    pub async fn changed(&mut self) -> Option<Arc<ClusterState>> {
        loop {
            self.rx.changed().await.ok()?;
            let state = self.rx.borrow_and_update().clone();
            let key = state.watch_key(&self.collection);
            if key != self.seen {
                self.seen = key;
                self.latest = state.clone();
                return Some(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::{encode, ReplicaRole, ReplicaState, Replica};
    use crate::metastore::{MemoryStore, Op};
    use chrono::Utc;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn props(name: &str, shards: &[&str]) -> CollectionProps {
        CollectionProps {
            name: name.to_string(),
            config_name: "conf1".into(),
            replication_factor: 1,
            shard_names: shards.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn create_ops(name: &str, shards: &[&str]) -> Vec<Op> {
        let mut ops = vec![Op::Put {
            key: paths::collection_key(name),
            value: encode(&props(name, shards)).unwrap(),
            expected: 0,
        }];
        for shard in shards {
            ops.push(Op::Put {
                key: paths::shard_key(name, shard),
                value: encode(&Shard::new(*shard)).unwrap(),
                expected: 0,
            });
        }
        ops
    }

    fn model() -> (Arc<MemoryStore>, Arc<TopologyModel>) {
        let store = Arc::new(MemoryStore::default());
        let model = Arc::new(TopologyModel::new(
            store.clone(),
            Arc::new(CoordinatorMetrics::new()),
        ));
        (store, model)
    }

    #[test]
    fn test_force_refresh_orders_shards() {
        let (store, model) = model();
        store
            .transact(create_ops("c", &["shard1", "shard2", "shard10"]))
            .unwrap();

        let state = model.force_refresh("c").unwrap();
        let names: Vec<_> = state
            .collection("c")
            .unwrap()
            .shards
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, vec!["shard1", "shard2", "shard10"]);
        assert_eq!(state.collection_revision("c"), Some(1));
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let (store, model) = model();
        store.transact(create_ops("c", &["shard1"])).unwrap();

        let first = model.force_refresh("c").unwrap();
        let second = model.force_refresh("c").unwrap();
        assert_eq!(first.version, second.version);
    }

    #[test]
    fn test_refresh_all_drops_deleted_collections() {
        let (store, model) = model();
        store.transact(create_ops("a", &["shard1"])).unwrap();
        store.transact(create_ops("b", &["shard1"])).unwrap();
        assert_eq!(model.refresh_all().unwrap().collections.len(), 2);

        store
            .transact(vec![
                Op::Delete {
                    key: paths::collection_key("a"),
                    expected: 1,
                },
                Op::Delete {
                    key: paths::shard_key("a", "shard1"),
                    expected: 1,
                },
            ])
            .unwrap();
        let state = model.refresh_all().unwrap();
        assert!(!state.has_collection("a"));
        assert!(state.has_collection("b"));
    }

    #[tokio::test]
    async fn test_watcher_follows_store() {
        let (store, model) = model();
        let handle = model.spawn_watcher();
        let mut watch = model.watch_collection("c");

        store.transact(create_ops("c", &["shard1"])).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(5), watch.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.collection("c").unwrap().shard_count(), 1);

        // Add a replica to the shard record
        let mut shard = Shard::new("shard1");
        shard.replicas.push(Replica {
            core_name: "c_shard1_replica_n1".into(),
            node_name: "n1".into(),
            base_url: "http://n1/solr".into(),
            role: ReplicaRole::Follower,
            state: ReplicaState::Down,
            data_dir: None,
            registered_at: 1,
        });
        store
            .conditional_write(&paths::shard_key("c", "shard1"), encode(&shard).unwrap(), 1)
            .unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), watch.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(state.collection("c").unwrap().contains_core("c_shard1_replica_n1"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_on_change_ignores_other_collections() {
        let (store, model) = model();
        let handle = model.spawn_watcher();
        let stream = model.on_change("mine");
        tokio::pin!(stream);

        store.transact(create_ops("other", &["shard1"])).unwrap();
        store.transact(create_ops("mine", &["shard1", "shard2"])).unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.collection("mine").unwrap().shard_count(), 2);

        handle.abort();
    }
}
