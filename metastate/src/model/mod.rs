//! Cluster metadata model consumed by the writer.
//!
//! These types are read-only snapshots from the writer's point of view: it
//! compares them across cycles but never mutates them.

pub mod cluster_state;
pub mod index;
pub mod metadata;

pub use cluster_state::{
    ClusterBlocks, ClusterState, DiscoveryNode, DiscoveryNodes, NodeRole, RoutingTable,
    ShardRouting,
};
pub use index::{IndexId, IndexMetadata, IndexState};
pub use metadata::{CoordinationMetadata, GlobalState, IndexTemplate, Metadata};
