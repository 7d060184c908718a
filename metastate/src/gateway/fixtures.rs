//! Cluster state builders shared by the gateway tests.

use crate::model::{ClusterState, DiscoveryNode, IndexId, IndexMetadata, IndexState, ShardRouting};
use std::sync::Arc;

pub const LOCAL_NODE: &str = "node-1";

pub fn index_id(name: &str) -> IndexId {
    IndexId::new(name, format!("uuid-{}", name))
}

pub fn index_meta(name: &str, version: u64) -> IndexMetadata {
    IndexMetadata::new(index_id(name), version)
}

pub fn closed_index_meta(name: &str, version: u64) -> IndexMetadata {
    index_meta(name, version).with_state(IndexState::Close)
}

/// State whose local node has the given roles
pub fn node_state(version: u64, master_eligible: bool, data: bool) -> ClusterState {
    let mut state = ClusterState {
        cluster_name: "test-cluster".to_string(),
        version,
        ..Default::default()
    };
    state.metadata.cluster_uuid = "cluster-uuid".to_string();
    state.nodes.local_node_id = LOCAL_NODE.to_string();
    state.nodes.add(DiscoveryNode::new(LOCAL_NODE, master_eligible, data));
    state
}

pub fn master_state(version: u64, indices: &[IndexMetadata]) -> ClusterState {
    let mut state = node_state(version, true, true);
    for index in indices {
        state.metadata.put_index(index.clone());
    }
    state
}

pub fn route_to_local(state: &mut ClusterState, index: &IndexId) {
    state.routing_table.add(ShardRouting {
        index: index.clone(),
        shard: 0,
        primary: true,
        node_id: Some(LOCAL_NODE.to_string()),
    });
}

/// Same state under a new version, as the next update would publish it
pub fn next_version(state: &ClusterState) -> ClusterState {
    let mut next = state.clone();
    next.version += 1;
    next
}

pub fn shared(state: ClusterState) -> Arc<ClusterState> {
    Arc::new(state)
}
