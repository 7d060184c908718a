//! Incremental cluster state writer.
//!
//! [`write_cluster_state`] runs one update cycle as a function of the previous
//! [`WriterState`] and returns the next one. [`IncrementalClusterStateWriter`]
//! owns the store and the current state, and replaces the state only after a
//! cycle succeeds, so a failed cycle leaves it exactly as it was.

use super::actions::resolve_index_metadata_actions;
use super::atomic_writer::AtomicClusterStateWriter;
use super::manifest::{Generation, Manifest};
use super::relevance::relevant_indices;
use crate::config::WriterConfig;
use crate::model::{ClusterState, IndexId, Metadata, NodeRole};
use crate::store::MetaStateService;
use crate::utils::errors::{Result, WriteStateError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the writer last committed.
#[derive(Debug, Clone)]
pub struct WriterState {
    pub previous_manifest: Manifest,
    pub previous_cluster_state: Arc<ClusterState>,
    /// When false the next cycle rewrites the global state and every relevant
    /// index regardless of what changed.
    pub incremental_write: bool,
}

/// Outcome of one update cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub global_written: bool,
    pub indices_written: usize,
    pub indices_skipped: usize,
    pub manifest_written: bool,
    pub took: Duration,
}

/// Persist `new_state` on top of `state`.
///
/// The global state is compared with the state the writer last committed;
/// index versions are compared with `previous_state`, the state the caller
/// last applied. All planning happens before the first write, so a planning
/// error leaves the store untouched.
pub fn write_cluster_state<S: MetaStateService + ?Sized>(
    store: &S,
    state: &WriterState,
    new_state: Arc<ClusterState>,
    previous_state: &ClusterState,
) -> Result<(WriterState, WriteStats)> {
    let started = Instant::now();
    let previous_manifest = &state.previous_manifest;
    let mut stats = WriteStats::default();

    let manifest = {
        let new_metadata = &new_state.metadata;
        let role = NodeRole::of_local_node(&new_state)?;
        let relevant = relevant_indices(
            role,
            &new_state,
            previous_state,
            &previous_manifest.index_generations,
        )?;
        let previous_metadata = state.incremental_write.then_some(&previous_state.metadata);
        let actions = resolve_index_metadata_actions(
            &previous_manifest.index_generations,
            &relevant,
            previous_metadata,
            new_metadata,
        )?;

        let mut writer = AtomicClusterStateWriter::new(store, previous_manifest);

        let global_changed =
            !Metadata::is_global_state_equal(&state.previous_cluster_state.metadata, new_metadata);
        let global_generation = if !state.incremental_write || global_changed {
            stats.global_written = true;
            writer.write_global_state("changed", new_metadata)?
        } else {
            previous_manifest.global_generation
        };

        let mut index_generations: BTreeMap<IndexId, Generation> = BTreeMap::new();
        for action in &actions {
            let generation = action.execute(&mut writer)?;
            index_generations.insert(action.index().clone(), generation);
        }
        stats.indices_written = writer.indices_written();
        stats.indices_skipped = writer.indices_skipped();

        let manifest = Manifest::new(
            previous_manifest.current_term,
            new_state.version,
            global_generation,
            index_generations,
        );
        if manifest != *previous_manifest {
            writer.write_manifest_and_cleanup("changed", &manifest)?;
            stats.manifest_written = true;
        }
        manifest
    };

    stats.took = started.elapsed();
    let next = WriterState {
        previous_manifest: manifest,
        previous_cluster_state: new_state,
        incremental_write: state.incremental_write,
    };
    Ok((next, stats))
}

/// Owner of the store and of the last committed [`WriterState`].
///
/// Methods take `&mut self`; callers serialize access.
pub struct IncrementalClusterStateWriter<S: MetaStateService> {
    store: S,
    state: WriterState,
    slow_write_logging_threshold: Duration,
}

impl<S: MetaStateService> IncrementalClusterStateWriter<S> {
    pub fn new(
        store: S,
        manifest: Manifest,
        cluster_state: ClusterState,
        config: &WriterConfig,
    ) -> Self {
        Self {
            store,
            state: WriterState {
                previous_manifest: manifest,
                previous_cluster_state: Arc::new(cluster_state),
                incremental_write: config.incremental_write,
            },
            slow_write_logging_threshold: config.slow_write_logging_threshold(),
        }
    }

    /// Start from whatever the store last committed.
    pub fn open(store: S, config: &WriterConfig) -> Result<Self> {
        let (manifest, metadata) = store.load_full_state()?;
        info!(
            term = manifest.current_term,
            version = manifest.cluster_state_version,
            indices = manifest.index_generations.len(),
            "Loaded persisted cluster state"
        );
        let cluster_state = ClusterState::from_persisted(metadata, manifest.cluster_state_version);
        Ok(Self::new(store, manifest, cluster_state, config))
    }

    /// Persist `new_state`. On error the writer keeps its previous state and
    /// the same update can be retried.
    pub fn update_cluster_state(
        &mut self,
        new_state: Arc<ClusterState>,
        previous_state: &ClusterState,
    ) -> Result<WriteStats> {
        let (next, stats) =
            write_cluster_state(&self.store, &self.state, new_state, previous_state)?;
        self.state = next;

        if stats.took > self.slow_write_logging_threshold {
            warn!(
                took_ms = stats.took.as_millis() as u64,
                threshold_ms = self.slow_write_logging_threshold.as_millis() as u64,
                indices_written = stats.indices_written,
                indices_skipped = stats.indices_skipped,
                "Writing cluster state took longer than the warn threshold"
            );
        } else {
            debug!(
                took_ms = stats.took.as_millis() as u64,
                indices_written = stats.indices_written,
                indices_skipped = stats.indices_skipped,
                "Wrote cluster state"
            );
        }
        Ok(stats)
    }

    /// Record a new term. The manifest is written even if the term is unchanged.
    pub fn set_current_term(
        &mut self,
        current_term: u64,
    ) -> std::result::Result<(), WriteStateError> {
        let manifest = self.state.previous_manifest.with_current_term(current_term);
        let mut writer = AtomicClusterStateWriter::new(&self.store, &self.state.previous_manifest);
        writer.write_manifest_and_cleanup("current term changed", &manifest)?;
        self.state.previous_manifest = manifest;
        Ok(())
    }

    pub fn set_incremental_write(&mut self, incremental_write: bool) {
        self.state.incremental_write = incremental_write;
    }

    pub fn set_slow_write_logging_threshold(&mut self, threshold: Duration) {
        self.slow_write_logging_threshold = threshold;
    }

    pub fn previous_manifest(&self) -> &Manifest {
        &self.state.previous_manifest
    }

    pub fn previous_cluster_state(&self) -> &Arc<ClusterState> {
        &self.state.previous_cluster_state
    }

    pub fn state(&self) -> &WriterState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
