//! Cluster state snapshot: metadata, nodes, routing and blocks.

use super::index::IndexId;
use super::metadata::Metadata;
use crate::utils::errors::{MetaStateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub master_eligible: bool,

    #[serde(default)]
    pub data: bool,
}

impl DiscoveryNode {
    pub fn new(id: impl Into<String>, master_eligible: bool, data: bool) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            master_eligible,
            data,
        }
    }
}

/// The role that decides which indices a node persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Persists every index in the metadata
    MasterEligible,
    /// Persists only the indices it hosts, plus closed ones it already wrote
    DataOnly,
    /// Persists no index metadata
    CoordinatingOnly,
}

impl NodeRole {
    pub fn of(node: &DiscoveryNode) -> Self {
        if node.master_eligible {
            NodeRole::MasterEligible
        } else if node.data {
            NodeRole::DataOnly
        } else {
            NodeRole::CoordinatingOnly
        }
    }

    /// Role of the local node in `state`
    pub fn of_local_node(state: &ClusterState) -> Result<Self> {
        state
            .nodes
            .local_node()
            .map(NodeRole::of)
            .ok_or_else(|| MetaStateError::LocalNodeMissing(state.nodes.local_node_id.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    #[serde(default)]
    pub local_node_id: String,

    /// Keyed by node id
    #[serde(default)]
    pub nodes: BTreeMap<String, DiscoveryNode>,
}

impl DiscoveryNodes {
    pub fn local_node(&self) -> Option<&DiscoveryNode> {
        self.nodes.get(&self.local_node_id)
    }

    pub fn add(&mut self, node: DiscoveryNode) {
        self.nodes.insert(node.id.clone(), node);
    }
}

/// One shard copy and where it is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub index: IndexId,
    pub shard: u32,

    #[serde(default)]
    pub primary: bool,

    /// `None` while unassigned
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub shards: Vec<ShardRouting>,
}

impl RoutingTable {
    pub fn add(&mut self, shard: ShardRouting) {
        self.shards.push(shard);
    }

    /// Every index with at least one shard copy assigned to `node_id`
    pub fn indices_on_node(&self, node_id: &str) -> BTreeSet<IndexId> {
        self.shards
            .iter()
            .filter(|s| s.node_id.as_deref() == Some(node_id))
            .map(|s| s.index.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBlocks {
    /// Set while the cluster has not recovered its state yet
    #[serde(default)]
    pub disable_state_persistence: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub cluster_name: String,

    pub version: u64,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub nodes: DiscoveryNodes,

    #[serde(default)]
    pub routing_table: RoutingTable,

    #[serde(default)]
    pub blocks: ClusterBlocks,
}

impl ClusterState {
    /// State rebuilt from disk at startup: metadata only, no nodes or routing.
    pub fn from_persisted(metadata: Metadata, version: u64) -> Self {
        Self {
            version,
            metadata,
            ..Default::default()
        }
    }

    pub fn term(&self) -> u64 {
        self.metadata.coordination.term
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_role_prefers_master() {
        assert_eq!(NodeRole::of(&DiscoveryNode::new("a", true, true)), NodeRole::MasterEligible);
        assert_eq!(NodeRole::of(&DiscoveryNode::new("b", false, true)), NodeRole::DataOnly);
        assert_eq!(
            NodeRole::of(&DiscoveryNode::new("c", false, false)),
            NodeRole::CoordinatingOnly
        );
    }

    #[test]
    fn test_local_role_requires_local_node() {
        let mut state = ClusterState::default();
        state.nodes.local_node_id = "n1".into();
        assert!(matches!(
            NodeRole::of_local_node(&state),
            Err(MetaStateError::LocalNodeMissing(id)) if id == "n1"
        ));

        state.nodes.add(DiscoveryNode::new("n1", false, true));
        assert_eq!(NodeRole::of_local_node(&state).unwrap(), NodeRole::DataOnly);
    }

    #[test]
    fn test_indices_on_node_skips_unassigned_and_remote() {
        let a = IndexId::new("a", "ua");
        let b = IndexId::new("b", "ub");
        let c = IndexId::new("c", "uc");
        let mut routing = RoutingTable::default();
        routing.add(ShardRouting {
            index: a.clone(),
            shard: 0,
            primary: true,
            node_id: Some("n1".into()),
        });
        routing.add(ShardRouting {
            index: a.clone(),
            shard: 1,
            primary: true,
            node_id: Some("n1".into()),
        });
        routing.add(ShardRouting { index: b, shard: 0, primary: true, node_id: Some("n2".into()) });
        routing.add(ShardRouting { index: c, shard: 0, primary: false, node_id: None });

        let on_n1 = routing.indices_on_node("n1");
        assert_eq!(on_n1.len(), 1);
        assert!(on_n1.contains(&a));
    }
}
