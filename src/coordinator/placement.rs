//! Replica placement using HRW hashing
//!
//! Each shard is keyed as `collection/shard`; nodes are ranked by their
//! highest random weight for that key. When the replication factor exceeds the
//! number of candidate nodes the ranking is reused from the top, so a node can
//! host more than one replica of a shard.

use crate::common::{Error, Result};
use crate::coordinator::state::ClusterState;

/// Weight of `node` for `key`
fn weight(key: &str, node: &str) -> u64 {
    let hash = blake3::hash(format!("{}{}", key, node).as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

/// Nodes sorted by weight for `key`, heaviest first
pub fn hrw_rank(key: &str, nodes: &[String]) -> Vec<String> {
    let mut weights: Vec<(&String, u64)> = nodes.iter().map(|n| (n, weight(key, n))).collect();
    // Ties broken by name so the ranking is total
    weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    weights.into_iter().map(|(node, _)| node.clone()).collect()
}

/// A planned replica: which node hosts copy `ordinal` of a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReplica {
    pub shard: String,
    pub node_name: String,
    /// 1-based, unique within the collection
    pub ordinal: usize,
}

impl PlannedReplica {
    pub fn core_name(&self, collection: &str) -> String {
        format!("{}_{}_replica_n{}", collection, self.shard, self.ordinal)
    }
}

/// Plan `replication_factor` replicas per shard over the live members of
/// `node_set`.
pub fn plan(
    state: &ClusterState,
    collection: &str,
    shard_names: &[String],
    replication_factor: usize,
    node_set: &[String],
) -> Result<Vec<PlannedReplica>> {
    let mut live: Vec<String> = node_set
        .iter()
        .filter(|n| state.is_live(n))
        .cloned()
        .collect();
    live.sort();
    live.dedup();

    if live.is_empty() {
        return Err(Error::NoLiveNodes);
    }

    let mut planned = Vec::with_capacity(shard_names.len() * replication_factor);
    let mut ordinal = 0;
    for shard in shard_names {
        let ranked = hrw_rank(&format!("{}/{}", collection, shard), &live);
        for node in ranked.iter().cycle().take(replication_factor) {
            ordinal += 1;
            planned.push(PlannedReplica {
                shard: shard.clone(),
                node_name: node.clone(),
                ordinal,
            });
        }
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::LiveNode;
    use chrono::Utc;

    fn state_with(nodes: &[&str]) -> ClusterState {
        let mut state = ClusterState::default();
        for node in nodes {
            state.live_nodes.insert(
                node.to_string(),
                LiveNode {
                    node_name: node.to_string(),
                    base_url: format!("http://{}/solr", node),
                    registered_at: Utc::now(),
                },
            );
        }
        state
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_is_deterministic() {
        let nodes = names(&["n1", "n2", "n3", "n4"]);
        let a = hrw_rank("c/shard1", &nodes);
        let b = hrw_rank("c/shard1", &nodes);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_plan_spreads_distinct_nodes() {
        let state = state_with(&["n1", "n2", "n3"]);
        let planned = plan(
            &state,
            "c",
            &names(&["shard1", "shard2"]),
            3,
            &names(&["n1", "n2", "n3"]),
        )
        .unwrap();

        assert_eq!(planned.len(), 6);
        let mut shard1: Vec<_> = planned
            .iter()
            .filter(|p| p.shard == "shard1")
            .map(|p| p.node_name.clone())
            .collect();
        shard1.sort();
        assert_eq!(shard1, names(&["n1", "n2", "n3"]));
        assert_eq!(planned[5].core_name("c"), "c_shard2_replica_n6");
    }

    #[test]
    fn test_plan_skips_dead_nodes() {
        let state = state_with(&["n1"]);
        let planned = plan(&state, "c", &names(&["shard1"]), 2, &names(&["n1", "n9"])).unwrap();
        assert!(planned.iter().all(|p| p.node_name == "n1"));

        let result = plan(&state, "c", &names(&["shard1"]), 1, &names(&["n9"]));
        assert!(matches!(result, Err(Error::NoLiveNodes)));
    }
}
