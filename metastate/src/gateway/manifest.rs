//! Manifest types for incremental state persistence.
//!
//! A manifest records the generation of the global state and of every tracked
//! index that is known to be durably written. It is written last in each
//! cycle, so whatever it references is complete on disk.

use crate::model::IndexId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Identifies one durable on-disk version of a metadata unit.
pub type Generation = u64;

/// Placeholder for a unit that has never been written. Stores hand out
/// generations starting at 1.
pub const NO_GENERATION: Generation = 0;

/// Root record of the persisted state, serialized as `manifest-<N>.st`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub current_term: u64,
    pub cluster_state_version: u64,
    pub global_generation: Generation,
    #[serde(
        serialize_with = "serialize_index_generations",
        deserialize_with = "deserialize_index_generations"
    )]
    pub index_generations: BTreeMap<IndexId, Generation>,
}

/// One `index_generations` entry as it appears on disk.
#[derive(Serialize, Deserialize)]
struct IndexGenerationEntry {
    index: IndexId,
    generation: Generation,
}

impl Manifest {
    pub fn new(
        current_term: u64,
        cluster_state_version: u64,
        global_generation: Generation,
        index_generations: BTreeMap<IndexId, Generation>,
    ) -> Self {
        Self {
            current_term,
            cluster_state_version,
            global_generation,
            index_generations,
        }
    }

    /// Manifest of a node that has never persisted anything
    pub fn empty() -> Self {
        Self::new(0, 0, NO_GENERATION, BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    pub fn is_global_generation_missing(&self) -> bool {
        self.global_generation == NO_GENERATION
    }

    pub fn index_generation(&self, index: &IndexId) -> Option<Generation> {
        self.index_generations.get(index).copied()
    }

    /// Successor carrying a new term and everything else unchanged
    pub fn with_current_term(&self, current_term: u64) -> Self {
        Self {
            current_term,
            ..self.clone()
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

fn serialize_index_generations<S>(
    generations: &BTreeMap<IndexId, Generation>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let entries: Vec<IndexGenerationEntry> = generations
        .iter()
        .map(|(index, generation)| IndexGenerationEntry {
            index: index.clone(),
            generation: *generation,
        })
        .collect();
    entries.serialize(serializer)
}

fn deserialize_index_generations<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<IndexId, Generation>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<IndexGenerationEntry>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.index, entry.generation))
        .collect())
}
