//! Replica unload tests for shardkeeper

use shardkeeper::common::CoordinatorConfig;
use shardkeeper::coordinator::{AddReplica, CreateCollection, ReplicaState};
use shardkeeper::metastore::MemoryStore;
use shardkeeper::node::LocalNodes;
use shardkeeper::{Coordinator, Error};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(20);

fn cluster(node_names: &[&str]) -> (Arc<LocalNodes>, Arc<Coordinator>) {
    let store = Arc::new(MemoryStore::default());
    let nodes = Arc::new(LocalNodes::new(store.clone()));
    for name in node_names {
        nodes.start_node(name).unwrap();
    }
    let config = CoordinatorConfig {
        node_timeout_ms: 5_000,
        recovery_grace_ms: 2_000,
        ..Default::default()
    };
    let coord = Coordinator::start(config, store, nodes.clone()).unwrap();
    (nodes, Arc::new(coord))
}

fn docs(prefix: &str, count: usize) -> Vec<(String, String)> {
    (0..count)
        .map(|n| (format!("{}-{}", prefix, n), format!("body {}", n)))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unload_leader_twice_keeps_counts_in_sync() {
    let (nodes, coord) = cluster(&["n1", "n2", "n3", "n4"]);

    coord
        .create_collection(CreateCollection::new("D", 1))
        .await
        .unwrap();
    for i in 1..=4 {
        let core = format!("D_shard1_replica_n{}", i);
        coord
            .add_replica(
                AddReplica::new("D", "shard1", core.as_str(), format!("n{}", i))
                    .with_data_dir(format!("/data/{}", core)),
            )
            .await
            .unwrap();
    }
    coord
        .wait_for_recoveries("D", WAIT)
        .await
        .into_result()
        .unwrap();

    nodes
        .index(&coord.current_state(), "D", &docs("first", 100))
        .await
        .unwrap();

    // First unload
    let first = coord.get_leader_retry("D", "shard1", WAIT).await.unwrap();
    coord.remove_replica(&first.core_name, false).await.unwrap();
    let second = coord
        .wait_for_leader_change("D", "shard1", &first.core_url(), WAIT)
        .await
        .unwrap();
    assert_ne!(second.core_name, first.core_name);

    nodes
        .index(&coord.current_state(), "D", &docs("second", 50))
        .await
        .unwrap();

    // Second unload
    coord.remove_replica(&second.core_name, false).await.unwrap();
    let third = coord
        .wait_for_leader_change("D", "shard1", &second.core_url(), WAIT)
        .await
        .unwrap();
    assert_ne!(third.core_name, second.core_name);

    nodes
        .index(&coord.current_state(), "D", &docs("third", 32))
        .await
        .unwrap();

    // Bring the first leader back on its old data dir
    coord
        .add_replica(
            AddReplica::new("D", "shard1", first.core_name.as_str(), first.node_name.as_str())
                .with_data_dir(format!("/data/{}", first.core_name)),
        )
        .await
        .unwrap();
    coord
        .wait_for_recoveries("D", WAIT)
        .await
        .into_result()
        .unwrap();

    let state = coord.current_state();
    let shard = state.shard("D", "shard1").unwrap();
    assert_eq!(shard.replicas.len(), 3);
    for replica in &shard.replicas {
        assert_eq!(
            nodes.num_found(&replica.core_name).await.unwrap(),
            182,
            "{} is out of sync",
            replica.core_name
        );
    }
    assert_eq!(coord.get_leader("D", "shard1").unwrap().core_name, third.core_name);

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unloads() {
    let (_nodes, coord) = cluster(&["n1", "n2", "n3"]);

    coord
        .create_collection(CreateCollection::new("E", 2).with_replicas(
            3,
            vec!["n1".into(), "n2".into(), "n3".into()],
        ))
        .await
        .unwrap();
    coord
        .wait_for_recoveries("E", WAIT)
        .await
        .into_result()
        .unwrap();

    let state = coord.current_state();
    let cores: Vec<String> = state
        .collection("E")
        .unwrap()
        .replicas()
        .map(|(_, r)| r.core_name.clone())
        .collect();
    assert_eq!(cores.len(), 6);

    let unloads: Vec<_> = cores
        .iter()
        .cloned()
        .map(|core| {
            let coord = coord.clone();
            tokio::spawn(async move { coord.remove_replica(&core, true).await })
        })
        .collect();
    for unload in unloads {
        unload.await.unwrap().unwrap();
    }

    let convergence = coord
        .wait_for("E", WAIT, |state| {
            state.collection("E").is_some_and(|c| {
                c.shard_count() == 2 && cores.iter().all(|core| !c.contains_core(core))
            })
        })
        .await;
    assert!(convergence.converged);

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unload_shard_and_collection() {
    let (_nodes, coord) = cluster(&["n1"]);

    coord
        .create_collection(CreateCollection::new("F", 2))
        .await
        .unwrap();
    coord
        .add_replica(AddReplica::new("F", "shard1", "F_shard1_replica_n1", "n1"))
        .await
        .unwrap();
    coord
        .add_replica(AddReplica::new("F", "shard2", "F_shard2_replica_n1", "n1"))
        .await
        .unwrap();

    for core in ["F_shard2_replica_n1", "F_shard1_replica_n1"] {
        coord.remove_replica(core, false).await.unwrap();
        let convergence = coord
            .wait_for_replica_absence("F", core, 2, WAIT)
            .await;
        assert!(convergence.converged, "{} still present", core);
        assert!(convergence.state.has_collection("F"));
    }

    let state = coord.current_state();
    let collection = state.collection("F").unwrap();
    assert_eq!(collection.shard_count(), 2);
    assert!(collection.replicas().next().is_none());

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_unload_recovering_replica() {
    let (nodes, coord) = cluster(&["n1", "n2"]);

    coord
        .create_collection(CreateCollection::new("G", 1))
        .await
        .unwrap();
    coord
        .add_replica(AddReplica::new("G", "shard1", "g1", "n1"))
        .await
        .unwrap();
    coord.get_leader_retry("G", "shard1", WAIT).await.unwrap();

    nodes.set_recovery_delay(Duration::from_millis(500));
    let adding = {
        let coord = coord.clone();
        tokio::spawn(async move {
            coord
                .add_replica(AddReplica::new("G", "shard1", "g2", "n2"))
                .await
        })
    };

    let recovering = coord
        .wait_for("G", WAIT, |state| {
            state
                .shard("G", "shard1")
                .and_then(|s| s.replica("g2"))
                .is_some_and(|r| r.state == ReplicaState::Recovering)
        })
        .await;
    assert!(recovering.converged);

    coord.remove_replica("g2", true).await.unwrap();
    let added = adding.await.unwrap();
    assert!(matches!(added, Err(Error::NodeUnavailable { .. })));

    let convergence = coord.wait_for_replica_absence("G", "g2", 1, WAIT).await;
    assert!(convergence.converged);
    assert_eq!(coord.get_leader("G", "shard1").unwrap().core_name, "g1");

    coord.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_unload_waits_for_recovery() {
    let (nodes, coord) = cluster(&["n1", "n2"]);

    coord
        .create_collection(CreateCollection::new("K", 1))
        .await
        .unwrap();
    coord
        .add_replica(AddReplica::new("K", "shard1", "k1", "n1"))
        .await
        .unwrap();
    coord.get_leader_retry("K", "shard1", WAIT).await.unwrap();

    nodes.set_recovery_delay(Duration::from_millis(300));
    let adding = {
        let coord = coord.clone();
        tokio::spawn(async move {
            coord
                .add_replica(AddReplica::new("K", "shard1", "k2", "n2"))
                .await
        })
    };
    coord
        .wait_for("K", WAIT, |state| {
            state
                .shard("K", "shard1")
                .and_then(|s| s.replica("k2"))
                .is_some_and(|r| r.state == ReplicaState::Recovering)
        })
        .await
        .into_result()
        .unwrap();

    // Without force the unload lets recovery finish first
    coord.remove_replica("k2", false).await.unwrap();
    let added = adding.await.unwrap().unwrap();
    assert_eq!(added.state, ReplicaState::Active);

    let convergence = coord.wait_for_replica_absence("K", "k2", 1, WAIT).await;
    assert!(convergence.converged);

    coord.shutdown();
}
