//! Durable key-generation stores for cluster metadata.
//!
//! A store writes global state, per-index metadata and manifests, each write
//! producing a new generation. Old generations are removed by explicit,
//! best-effort cleanup calls.

pub mod format;
pub mod fs;
pub mod memory;

use crate::gateway::manifest::{Generation, Manifest};
use crate::model::{IndexId, IndexMetadata, Metadata};
use crate::utils::errors::WriteStateError;

pub use fs::{DanglingIndex, FsMetaStateService};
pub use memory::{MemoryMetaStateService, StoreCall};

/// Storage backend used by the writer.
///
/// Writes either succeed with a generation strictly greater than every
/// generation the store currently holds for that unit, or fail with a
/// [`WriteStateError`] saying whether the outcome is known. Cleanup never
/// fails; problems are logged.
pub trait MetaStateService {
    fn write_global_state(
        &self,
        reason: &str,
        metadata: &Metadata,
    ) -> Result<Generation, WriteStateError>;

    fn write_index(
        &self,
        reason: &str,
        metadata: &IndexMetadata,
    ) -> Result<Generation, WriteStateError>;

    /// Write the manifest, then remove every older manifest.
    fn write_manifest_and_cleanup(
        &self,
        reason: &str,
        manifest: &Manifest,
    ) -> Result<(), WriteStateError>;

    /// Remove every global state generation except `keep`.
    fn cleanup_global_state(&self, keep: Generation);

    /// Remove every generation of `index` except `keep`.
    fn cleanup_index(&self, index: &IndexId, keep: Generation);

    /// Load the newest manifest and the metadata it references. A store that
    /// holds no manifest yields an empty manifest and empty metadata.
    fn load_full_state(&self) -> crate::Result<(Manifest, Metadata)>;
}
