//! Which indices a node persists, by role.

use super::manifest::Generation;
use crate::model::{ClusterState, IndexId, IndexState, NodeRole};
use crate::utils::errors::{MetaStateError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Indices whose metadata this node must persist for `state`.
///
/// A data-only node persists the indices it hosts shards of. It also keeps
/// persisting indices it already wrote that are closed now or were closed in
/// `previous_state`, since closed indices have no routing and a reopened one
/// needs its fresh state written before shards are allocated again.
pub fn relevant_indices(
    role: NodeRole,
    state: &ClusterState,
    previous_state: &ClusterState,
    previously_written: &BTreeMap<IndexId, Generation>,
) -> Result<BTreeSet<IndexId>> {
    match role {
        NodeRole::MasterEligible => Ok(state
            .metadata
            .iter_indices()
            .map(|m| m.index.clone())
            .collect()),
        NodeRole::DataOnly => {
            let local = state.nodes.local_node().ok_or_else(|| {
                MetaStateError::LocalNodeMissing(state.nodes.local_node_id.clone())
            })?;

            let mut indices = state.routing_table.indices_on_node(&local.id);
            for meta in state.metadata.iter_indices() {
                let was_closed = previous_state
                    .metadata
                    .index(&meta.index)
                    .is_some_and(|previous| previous.state == IndexState::Close);
                let is_or_was_closed = meta.is_closed() || was_closed;
                if is_or_was_closed && previously_written.contains_key(&meta.index) {
                    indices.insert(meta.index.clone());
                }
            }
            Ok(indices)
        }
        NodeRole::CoordinatingOnly => Ok(BTreeSet::new()),
    }
}
