//! Per-index metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of an index across metadata versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId {
    pub name: String,
    pub uuid: String,
}

impl IndexId {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    /// Mint an identity with a fresh random uuid
    pub fn random(name: impl Into<String>) -> Self {
        Self::new(name, uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.name, self.uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index: IndexId,

    /// Bumped on every change to this index's metadata
    pub version: u64,

    pub state: IndexState,

    #[serde(default = "default_number_of_shards")]
    pub number_of_shards: u32,

    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    #[serde(default)]
    pub mappings: serde_json::Value,
}

fn default_number_of_shards() -> u32 {
    1
}

impl IndexMetadata {
    pub fn new(index: IndexId, version: u64) -> Self {
        Self {
            index,
            version,
            state: IndexState::Open,
            number_of_shards: default_number_of_shards(),
            settings: BTreeMap::new(),
            mappings: serde_json::Value::Null,
        }
    }

    pub fn with_state(mut self, state: IndexState) -> Self {
        self.state = state;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.state == IndexState::Close
    }
}
