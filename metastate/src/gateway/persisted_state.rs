//! The two callers of the writer: the data-node state applier and the
//! master-eligible node's persisted coordination state.

use super::incremental::{IncrementalClusterStateWriter, WriteStats};
use crate::model::ClusterState;
use crate::store::MetaStateService;
use crate::utils::errors::{MetaStateError, Result};
use std::sync::Arc;
use tracing::{error, warn};

/// Result of applying one cluster state on a data node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Persisted(WriteStats),
    /// State persistence is blocked; the next write after the block lifts is full.
    Skipped,
    /// Logged and dropped; the next applied state retries.
    Failed { dirty: bool },
}

/// Persists every cluster state applied on a node that is not master-eligible.
pub struct DataNodeStateApplier<S: MetaStateService> {
    writer: IncrementalClusterStateWriter<S>,
}

impl<S: MetaStateService> DataNodeStateApplier<S> {
    pub fn new(writer: IncrementalClusterStateWriter<S>) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &IncrementalClusterStateWriter<S> {
        &self.writer
    }

    pub fn apply_cluster_state(
        &mut self,
        new_state: Arc<ClusterState>,
        previous_state: &ClusterState,
    ) -> ApplyOutcome {
        if new_state.blocks.disable_state_persistence {
            self.writer.set_incremental_write(false);
            return ApplyOutcome::Skipped;
        }

        match self.persist(new_state, previous_state) {
            Ok(stats) => {
                self.writer.set_incremental_write(true);
                ApplyOutcome::Persisted(stats)
            }
            Err(e) => {
                warn!(error = %e, "Exception occurred when storing new metadata");
                ApplyOutcome::Failed { dirty: e.is_dirty() }
            }
        }
    }

    fn persist(
        &mut self,
        new_state: Arc<ClusterState>,
        previous_state: &ClusterState,
    ) -> Result<WriteStats> {
        // Keep the stored term at least as high as the term of the accepted state.
        if new_state.term() > self.writer.previous_manifest().current_term {
            self.writer.set_current_term(new_state.term())?;
        }
        self.writer.update_cluster_state(new_state, previous_state)
    }
}

/// Durable term and last accepted state of a master-eligible node.
///
/// A dirty write failure is returned as [`MetaStateError::Fatal`]: the
/// on-disk state is unknown and the node has to restart and reload it.
pub struct MasterPersistedState<S: MetaStateService> {
    writer: IncrementalClusterStateWriter<S>,
}

impl<S: MetaStateService> MasterPersistedState<S> {
    pub fn new(writer: IncrementalClusterStateWriter<S>) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &IncrementalClusterStateWriter<S> {
        &self.writer
    }

    pub fn current_term(&self) -> u64 {
        self.writer.previous_manifest().current_term
    }

    pub fn last_accepted_state(&self) -> &Arc<ClusterState> {
        self.writer.previous_cluster_state()
    }

    pub fn set_current_term(&mut self, current_term: u64) -> Result<()> {
        self.writer.set_current_term(current_term).map_err(|e| {
            error!(error = %e, "Failed to set current term to {}", current_term);
            escalate(MetaStateError::WriteState(e))
        })
    }

    /// Accept `state`. Within one term the write is incremental against the
    /// last accepted state; a new term forces a full write.
    pub fn set_last_accepted_state(&mut self, state: Arc<ClusterState>) -> Result<()> {
        let previous = Arc::clone(self.writer.previous_cluster_state());
        let version = state.version;
        self.writer.set_incremental_write(previous.term() == state.term());
        self.writer.update_cluster_state(state, &previous).map(|_| ()).map_err(|e| {
            error!(error = %e, "Failed to set last accepted state with version {}", version);
            escalate(e)
        })
    }
}

fn escalate(err: MetaStateError) -> MetaStateError {
    match err {
        MetaStateError::WriteState(e) if e.is_dirty() => MetaStateError::Fatal(e),
        other => other,
    }
}
