//! File-system backed metadata store.
//!
//! Directory layout under the data directory:
//!
//! ```text
//! _state/manifest-<N>.st
//! _state/global-<N>.st
//! indices/<uuid>/_state/state-<N>.st
//! ```

use super::format::StateFormat;
use super::MetaStateService;
use crate::gateway::manifest::{Generation, Manifest};
use crate::model::{GlobalState, IndexId, IndexMetadata, Metadata};
use crate::utils::errors::{MetaStateError, Result, WriteStateError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const STATE_DIR_NAME: &str = "_state";
pub const INDICES_DIR_NAME: &str = "indices";

const MANIFEST_FORMAT: StateFormat = StateFormat::new("manifest-");
const GLOBAL_FORMAT: StateFormat = StateFormat::new("global-");
const INDEX_FORMAT: StateFormat = StateFormat::new("state-");

/// Index metadata found on disk that the current manifest does not reference.
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingIndex {
    pub index: IndexId,
    pub generation: Generation,
    pub path: PathBuf,
}

/// Store that keeps every metadata unit as generational files under one directory
#[derive(Debug, Clone)]
pub struct FsMetaStateService {
    data_dir: PathBuf,
}

impl FsMetaStateService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn node_state_dir(&self) -> PathBuf {
        self.data_dir.join(STATE_DIR_NAME)
    }

    fn indices_dir(&self) -> PathBuf {
        self.data_dir.join(INDICES_DIR_NAME)
    }

    fn index_state_dir(&self, index: &IndexId) -> PathBuf {
        self.indices_dir().join(&index.uuid).join(STATE_DIR_NAME)
    }

    /// Newest readable manifest, if any
    pub fn load_manifest(&self) -> Result<Option<Manifest>> {
        Ok(MANIFEST_FORMAT
            .load_latest::<Manifest>(&self.node_state_dir())?
            .map(|loaded| loaded.payload))
    }

    /// Generations currently on disk for `index`, ascending
    pub fn index_generations_on_disk(&self, index: &IndexId) -> Result<Vec<Generation>> {
        Ok(INDEX_FORMAT.generations(&self.index_state_dir(index))?)
    }

    /// Global state generations currently on disk, ascending
    pub fn global_generations_on_disk(&self) -> Result<Vec<Generation>> {
        Ok(GLOBAL_FORMAT.generations(&self.node_state_dir())?)
    }

    /// Index directories holding state that `manifest` does not reference.
    ///
    /// Freshly created indices whose cycle was rolled back are left on disk,
    /// so they show up here until a later cycle claims or removes them.
    pub fn find_dangling_indices(&self, manifest: &Manifest) -> Result<Vec<DanglingIndex>> {
        let indices_dir = self.indices_dir();
        if !indices_dir.exists() {
            return Ok(Vec::new());
        }

        let referenced: BTreeSet<&str> = manifest
            .index_generations
            .keys()
            .map(|index| index.uuid.as_str())
            .collect();

        // indices/<uuid>/_state/state-<N>.st
        let mut state_dirs = BTreeSet::new();
        for entry in WalkDir::new(&indices_dir).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| {
                MetaStateError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;

            if !entry.file_type().is_file()
                || INDEX_FORMAT
                    .parse_generation(&entry.file_name().to_string_lossy())
                    .is_none()
            {
                continue;
            }

            if let Some(state_dir) = entry.path().parent() {
                state_dirs.insert(state_dir.to_path_buf());
            }
        }

        let mut dangling = Vec::new();
        for state_dir in state_dirs {
            let uuid = state_dir
                .parent()
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if referenced.contains(uuid.as_str()) {
                continue;
            }

            match INDEX_FORMAT.load_latest::<IndexMetadata>(&state_dir) {
                Ok(Some(loaded)) => dangling.push(DanglingIndex {
                    index: loaded.payload.index,
                    generation: loaded.generation,
                    path: state_dir,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        dir = %state_dir.display(),
                        error = %e,
                        "Skipping unreadable index state"
                    );
                }
            }
        }

        Ok(dangling)
    }
}

impl MetaStateService for FsMetaStateService {
    fn write_global_state(
        &self,
        reason: &str,
        metadata: &Metadata,
    ) -> std::result::Result<Generation, WriteStateError> {
        let generation =
            GLOBAL_FORMAT.write(&self.node_state_dir(), reason, &metadata.global_state())?;
        debug!(generation, reason, "Wrote global state");
        Ok(generation)
    }

    fn write_index(
        &self,
        reason: &str,
        metadata: &IndexMetadata,
    ) -> std::result::Result<Generation, WriteStateError> {
        let dir = self.index_state_dir(&metadata.index);
        let generation = INDEX_FORMAT.write(&dir, reason, metadata)?;
        debug!(index = %metadata.index, generation, reason, "Wrote index state");
        Ok(generation)
    }

    fn write_manifest_and_cleanup(
        &self,
        reason: &str,
        manifest: &Manifest,
    ) -> std::result::Result<(), WriteStateError> {
        let dir = self.node_state_dir();
        let generation = MANIFEST_FORMAT.write(&dir, reason, manifest)?;
        MANIFEST_FORMAT.cleanup_old_files(&dir, generation);
        debug!(
            generation,
            term = manifest.current_term,
            version = manifest.cluster_state_version,
            reason,
            "Wrote manifest"
        );
        Ok(())
    }

    fn cleanup_global_state(&self, keep: Generation) {
        GLOBAL_FORMAT.cleanup_old_files(&self.node_state_dir(), keep);
    }

    fn cleanup_index(&self, index: &IndexId, keep: Generation) {
        INDEX_FORMAT.cleanup_old_files(&self.index_state_dir(index), keep);
    }

    fn load_full_state(&self) -> Result<(Manifest, Metadata)> {
        let Some(manifest) = self.load_manifest()? else {
            info!(
                data_dir = %self.data_dir.display(),
                "No manifest found, starting from empty state"
            );
            return Ok((Manifest::empty(), Metadata::default()));
        };

        let global = if manifest.is_global_generation_missing() {
            GlobalState::default()
        } else {
            GLOBAL_FORMAT
                .load_generation::<GlobalState>(&self.node_state_dir(), manifest.global_generation)?
                .payload
        };

        let mut indices = BTreeMap::new();
        for (index, generation) in &manifest.index_generations {
            let dir = self.index_state_dir(index);
            let loaded = INDEX_FORMAT.load_generation::<IndexMetadata>(&dir, *generation)?;
            if loaded.payload.index != *index {
                return Err(MetaStateError::CorruptedState {
                    path: dir.join(INDEX_FORMAT.file_name(*generation)),
                    reason: format!("expected index {} but found {}", index, loaded.payload.index),
                });
            }
            indices.insert(index.clone(), loaded.payload);
        }

        info!(
            term = manifest.current_term,
            version = manifest.cluster_state_version,
            indices = indices.len(),
            "Loaded persisted cluster metadata"
        );

        let metadata = Metadata::from_parts(global, indices.into_values());
        Ok((manifest, metadata))
    }
}
