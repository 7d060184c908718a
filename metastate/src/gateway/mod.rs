//! Incremental, crash-safe persistence of cluster metadata.
//!
//! One update cycle diffs the new cluster state against the previous one,
//! writes only the units that changed through an [`atomic_writer`]
//! transaction and commits a new [`manifest`] last.

pub mod actions;
pub mod atomic_writer;
pub mod incremental;
pub mod manifest;
pub mod persisted_state;
pub mod relevance;

pub use actions::{resolve_index_metadata_actions, IndexMetadataAction};
pub use atomic_writer::AtomicClusterStateWriter;
pub use incremental::{write_cluster_state, IncrementalClusterStateWriter, WriteStats, WriterState};
pub use manifest::{Generation, Manifest, NO_GENERATION};
pub use persisted_state::{ApplyOutcome, DataNodeStateApplier, MasterPersistedState};
pub use relevance::relevant_indices;

#[cfg(test)]
pub(crate) mod fixtures;
