//! Admin command and convergence tests for shardkeeper

use futures_util::StreamExt;
use shardkeeper::common::CoordinatorConfig;
use shardkeeper::coordinator::{AddReplica, CreateCollection, ElectionPhase};
use shardkeeper::metastore::{MemoryStore, MetaStore};
use shardkeeper::coordinator::{ClusterState, ReplicaState};
use shardkeeper::node::{LocalNodes, NodeRuntime, ReplicaSpec};
use shardkeeper::{Coordinator, Error};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(20);

fn cluster(node_names: &[&str]) -> (Arc<MemoryStore>, Arc<LocalNodes>, Coordinator) {
    let store = Arc::new(MemoryStore::default());
    let nodes = Arc::new(LocalNodes::new(store.clone()));
    for name in node_names {
        nodes.start_node(name).unwrap();
    }
    let config = CoordinatorConfig {
        node_timeout_ms: 5_000,
        ..Default::default()
    };
    let coord = Coordinator::start(config, store.clone(), nodes.clone()).unwrap();
    (store, nodes, coord)
}

#[tokio::test]
async fn test_command_errors() {
    let (_store, nodes, coord) = cluster(&["n1", "n2"]);

    assert_ok!(coord.create_collection(CreateCollection::new("c", 2)).await);
    let again = coord.create_collection(CreateCollection::new("c", 1)).await;
    assert!(matches!(again, Err(Error::CollectionExists(_))));
    let no_shards = coord.create_collection(CreateCollection::new("z", 0)).await;
    assert!(matches!(no_shards, Err(Error::InvalidArgument(_))));

    let missing_shard = coord
        .add_replica(AddReplica::new("c", "shard7", "core1", "n1"))
        .await;
    assert!(matches!(missing_shard, Err(Error::ShardNotFound { .. })));

    assert_ok!(
        coord
            .add_replica(AddReplica::new("c", "shard1", "core1", "n1"))
            .await
    );
    // Core names are unique across shards too
    let duplicate = coord
        .add_replica(AddReplica::new("c", "shard2", "core1", "n2"))
        .await;
    assert!(matches!(duplicate, Err(Error::DuplicateCoreName(_))));

    nodes.crash_node("n2").unwrap();
    let dead = coord
        .add_replica(AddReplica::new("c", "shard2", "core2", "n2"))
        .await;
    assert!(matches!(dead, Err(Error::NodeUnavailable { .. })));

    let unknown = coord.remove_replica("nope", false).await;
    assert!(matches!(unknown, Err(Error::ReplicaNotFound(_))));

    assert_err!(coord.get_leader("c", "shard9"));
    assert_err!(coord.get_leader("missing", "shard1"));

    let metrics = coord.metrics().to_prometheus();
    assert!(metrics.contains("shardkeeper_commands_failed_total{command=\"add_replica\"} 3"));

    coord.shutdown();
}

#[tokio::test]
async fn test_create_with_dead_node_set_writes_nothing() {
    let (store, _nodes, coord) = cluster(&["n1"]);

    let result = coord
        .create_collection(CreateCollection::new("p", 1).with_replicas(1, vec!["ghost".into()]))
        .await;
    assert!(matches!(result, Err(Error::NoLiveNodes)));
    assert!(store.list("/collections/").unwrap().entries.is_empty());

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_collection_releases_core_names() {
    let (_store, nodes, coord) = cluster(&["n1"]);

    coord
        .create_collection(CreateCollection::new("gone", 1).with_replicas(2, vec!["n1".into()]))
        .await
        .unwrap();
    coord
        .wait_for_recoveries("gone", WAIT)
        .await
        .into_result()
        .unwrap();
    assert_ok!(nodes.num_found("gone_shard1_replica_n1").await);

    coord.delete_collection("gone").await.unwrap();
    assert!(!coord.current_state().has_collection("gone"));
    assert_err!(nodes.num_found("gone_shard1_replica_n1").await);
    assert!(matches!(
        coord.delete_collection("gone").await,
        Err(Error::CollectionNotFound(_))
    ));

    // Same names can be used again
    coord
        .create_collection(CreateCollection::new("gone", 1))
        .await
        .unwrap();
    assert_ok!(
        coord
            .add_replica(AddReplica::new("gone", "shard1", "gone_shard1_replica_n1", "n1"))
            .await
    );

    coord.shutdown();
}

#[tokio::test]
async fn test_wait_for_already_true_returns_immediately() {
    let (_store, _nodes, coord) = cluster(&[]);
    coord
        .create_collection(CreateCollection::new("w", 3))
        .await
        .unwrap();

    let convergence = coord
        .wait_for("w", Duration::from_secs(60), |state| {
            state.collection("w").is_some_and(|c| c.shard_count() == 3)
        })
        .await;
    assert!(convergence.converged);
    assert!(convergence.elapsed < Duration::from_secs(5));
    assert_eq!(coord.metrics().active_waiters.get(), 0);

    let timed_out = coord
        .wait_for("w", Duration::from_millis(50), |state| state.has_collection("other"))
        .await;
    assert!(!timed_out.converged);
    assert!(timed_out.state.has_collection("w"));
    assert!(matches!(timed_out.into_result(), Err(Error::Timeout(_))));

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_on_change_and_phases() {
    let (_store, _nodes, coord) = cluster(&["n1"]);
    let stream = coord.on_change("s");
    tokio::pin!(stream);

    coord
        .create_collection(CreateCollection::new("s", 1))
        .await
        .unwrap();
    let first = tokio::time::timeout(WAIT, stream.next())
        .await
        .unwrap()
        .unwrap();
    assert!(first.has_collection("s"));
    assert_eq!(coord.election_phase("s", "shard1"), ElectionPhase::NoLeader);

    coord
        .add_replica(AddReplica::new("s", "shard1", "s1", "n1"))
        .await
        .unwrap();
    coord.get_leader_retry("s", "shard1", WAIT).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while coord.election_phase("s", "shard1") != ElectionPhase::HasLeader {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        coord.election_phases().get("s/shard1"),
        Some(&ElectionPhase::HasLeader)
    );

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_rebuilds_topology_from_store() {
    let store = Arc::new(MemoryStore::default());
    let nodes = Arc::new(LocalNodes::new(store.clone()));
    nodes.start_node("n1").unwrap();

    let first = Coordinator::start(CoordinatorConfig::default(), store.clone(), nodes.clone()).unwrap();
    first
        .create_collection(CreateCollection::new("kept", 2))
        .await
        .unwrap();
    first
        .add_replica(AddReplica::new("kept", "shard2", "kept_r1", "n1"))
        .await
        .unwrap();
    first.get_leader_retry("kept", "shard2", WAIT).await.unwrap();
    first.shutdown();
    drop(first);

    let revision = store.revision();
    let second = Coordinator::start(CoordinatorConfig::default(), store.clone(), nodes).unwrap();
    let state = second.current_state();
    assert_eq!(state.collection("kept").unwrap().shard_count(), 2);
    assert_eq!(second.get_leader("kept", "shard2").unwrap().core_name, "kept_r1");
    // Starting up does not write anything
    assert_eq!(store.revision(), revision);

    let present = second.wait_for_replica_presence("kept", "kept_r1", WAIT).await;
    assert!(present.converged);

    second.shutdown();
}

#[tokio::test]
async fn test_live_node_registration() {
    let (_store, _nodes, coord) = cluster(&["n1"]);
    assert!(coord.current_state().is_live("n1"));

    let node = coord.register_live_node("ext", "http://ext:8983/solr").unwrap();
    assert_eq!(node.base_url, "http://ext:8983/solr");
    assert!(coord.current_state().is_live("ext"));

    assert!(coord.unregister_live_node("ext").unwrap());
    assert!(!coord.unregister_live_node("ext").unwrap());
    assert!(!coord.current_state().is_live("ext"));

    coord.shutdown();
}

/// No replica is stuck recovering and every leader role sits on an active replica
fn settled(state: &ClusterState, collection: &str) -> bool {
    state.collection(collection).is_some_and(|c| {
        c.replicas().all(|(_, r)| {
            r.state != ReplicaState::Recovering && (!r.is_leader() || r.is_active())
        })
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_with_claimed_core_name_writes_nothing() {
    let (store, _nodes, coord) = cluster(&["n1", "n2"]);

    coord
        .create_collection(CreateCollection::new("other", 1))
        .await
        .unwrap();
    coord
        .add_replica(AddReplica::new("other", "shard1", "P_shard2_replica_n3", "n1"))
        .await
        .unwrap();

    let result = coord
        .create_collection(
            CreateCollection::new("P", 2).with_replicas(2, vec!["n1".into(), "n2".into()]),
        )
        .await;
    assert!(matches!(result, Err(Error::DuplicateCoreName(ref core)) if core == "P_shard2_replica_n3"));
    assert!(store.list("/collections/P/").unwrap().entries.is_empty());
    assert!(!coord.current_state().has_collection("P"));

    // The collection can be created once the name is free
    coord.remove_replica("P_shard2_replica_n3", false).await.unwrap();
    coord
        .create_collection(
            CreateCollection::new("P", 2).with_replicas(2, vec!["n1".into(), "n2".into()]),
        )
        .await
        .unwrap();
    coord
        .wait_for_recoveries("P", WAIT)
        .await
        .into_result()
        .unwrap();

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partial_placement_failure_leaves_no_replica_recovering() {
    let (_store, nodes, coord) = cluster(&["n1", "n2"]);
    nodes.set_recovery_delay(Duration::from_millis(300));

    // Occupy one planned core on both nodes behind the coordinator's back,
    // so its instantiation fails while the other adds are mid-recovery
    for node in ["n1", "n2"] {
        nodes
            .instantiate_replica(&ReplicaSpec {
                core_name: "Q_shard2_replica_n3".into(),
                collection: "elsewhere".into(),
                shard: "shard1".into(),
                node_name: node.into(),
                data_dir: None,
            })
            .await
            .unwrap();
    }

    let result = coord
        .create_collection(
            CreateCollection::new("Q", 2).with_replicas(2, vec!["n1".into(), "n2".into()]),
        )
        .await;
    assert!(matches!(result, Err(Error::NodeUnavailable { .. })));

    // Every sibling add has finished by the time the command returns
    let state = coord.force_refresh("Q").unwrap();
    let collection = state.collection("Q").unwrap();
    assert_eq!(collection.shard_count(), 2);
    assert!(collection
        .replicas()
        .all(|(_, r)| r.state != ReplicaState::Recovering));
    assert_eq!(
        collection
            .shard("shard2")
            .unwrap()
            .replica("Q_shard2_replica_n3")
            .unwrap()
            .state,
        ReplicaState::Down
    );

    // Both shards end up led by an active replica
    let convergence = coord
        .wait_for("Q", WAIT, |state| {
            settled(state, "Q")
                && state.leader("Q", "shard1").is_some()
                && state.leader("Q", "shard2").is_some()
        })
        .await;
    assert!(convergence.converged);
    assert_eq!(
        coord.get_leader("Q", "shard2").unwrap().core_name,
        "Q_shard2_replica_n4"
    );

    coord.shutdown();
}
