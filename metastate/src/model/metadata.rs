//! Cluster-wide metadata: the global part plus the per-index entries.

use super::index::{IndexId, IndexMetadata};
use crate::utils::errors::{MetaStateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinationMetadata {
    #[serde(default)]
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTemplate {
    pub patterns: Vec<String>,

    #[serde(default)]
    pub order: i32,

    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub cluster_uuid: String,

    /// Set once the cluster uuid has been committed by a quorum
    #[serde(default)]
    pub cluster_uuid_committed: bool,

    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub coordination: CoordinationMetadata,

    #[serde(default)]
    pub persistent_settings: BTreeMap<String, String>,

    #[serde(default)]
    pub templates: BTreeMap<String, IndexTemplate>,

    #[serde(default)]
    pub customs: BTreeMap<String, serde_json::Value>,

    /// Keyed by index name
    #[serde(default)]
    pub indices: BTreeMap<String, IndexMetadata>,
}

/// Everything in [`Metadata`] except the per-index entries. This is what a
/// global state generation holds on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub cluster_uuid: String,
    #[serde(default)]
    pub cluster_uuid_committed: bool,
    pub version: u64,
    pub coordination: CoordinationMetadata,
    pub persistent_settings: BTreeMap<String, String>,
    pub templates: BTreeMap<String, IndexTemplate>,
    pub customs: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// Look up an index by identity. A same-named index with another uuid is
    /// a different index and is not returned.
    pub fn index(&self, id: &IndexId) -> Option<&IndexMetadata> {
        self.indices
            .get(&id.name)
            .filter(|meta| meta.index.uuid == id.uuid)
    }

    pub fn index_safe(&self, id: &IndexId) -> Result<&IndexMetadata> {
        self.index(id)
            .ok_or_else(|| MetaStateError::IndexNotFound(id.clone()))
    }

    pub fn put_index(&mut self, meta: IndexMetadata) {
        self.indices.insert(meta.index.name.clone(), meta);
    }

    pub fn iter_indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    /// Semantic equality of the global part, ignoring `version` and indices.
    pub fn is_global_state_equal(a: &Metadata, b: &Metadata) -> bool {
        a.cluster_uuid == b.cluster_uuid
            && a.cluster_uuid_committed == b.cluster_uuid_committed
            && a.coordination == b.coordination
            && a.persistent_settings == b.persistent_settings
            && a.templates == b.templates
            && a.customs == b.customs
    }

    pub fn global_state(&self) -> GlobalState {
        GlobalState {
            cluster_uuid: self.cluster_uuid.clone(),
            cluster_uuid_committed: self.cluster_uuid_committed,
            version: self.version,
            coordination: self.coordination.clone(),
            persistent_settings: self.persistent_settings.clone(),
            templates: self.templates.clone(),
            customs: self.customs.clone(),
        }
    }

    /// Rebuild full metadata from a persisted global state and index entries
    pub fn from_parts(
        global: GlobalState,
        indices: impl IntoIterator<Item = IndexMetadata>,
    ) -> Self {
        let mut metadata = Metadata {
            cluster_uuid: global.cluster_uuid,
            cluster_uuid_committed: global.cluster_uuid_committed,
            version: global.version,
            coordination: global.coordination,
            persistent_settings: global.persistent_settings,
            templates: global.templates,
            customs: global.customs,
            indices: BTreeMap::new(),
        };
        for index in indices {
            metadata.put_index(index);
        }
        metadata
    }
}
