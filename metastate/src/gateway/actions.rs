//! Per-index write plan for one update cycle.

use super::atomic_writer::AtomicClusterStateWriter;
use super::manifest::Generation;
use crate::model::{IndexId, IndexMetadata, Metadata};
use crate::store::MetaStateService;
use crate::utils::errors::{Result, WriteStateError};
use std::collections::{BTreeMap, BTreeSet};

/// What to do with one relevant index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexMetadataAction<'a> {
    /// Unchanged since the last write; reuse its generation.
    KeepPreviousGeneration { index: IndexId, generation: Generation },
    /// Not written before, or a full write was requested.
    WriteNew { metadata: &'a IndexMetadata },
    /// Written before under a different version.
    WriteChanged {
        previous: &'a IndexMetadata,
        current: &'a IndexMetadata,
    },
}

impl<'a> IndexMetadataAction<'a> {
    pub fn index(&self) -> &IndexId {
        match self {
            IndexMetadataAction::KeepPreviousGeneration { index, .. } => index,
            IndexMetadataAction::WriteNew { metadata } => &metadata.index,
            IndexMetadataAction::WriteChanged { current, .. } => &current.index,
        }
    }

    pub fn execute<S: MetaStateService + ?Sized>(
        &self,
        writer: &mut AtomicClusterStateWriter<'_, S>,
    ) -> std::result::Result<Generation, WriteStateError> {
        match self {
            IndexMetadataAction::KeepPreviousGeneration { generation, .. } => {
                writer.skip_index();
                Ok(*generation)
            }
            IndexMetadataAction::WriteNew { metadata } => {
                writer.write_index("freshly created", metadata)
            }
            IndexMetadataAction::WriteChanged { previous, current } => {
                let reason = format!(
                    "version changed from [{}] to [{}]",
                    previous.version, current.version
                );
                writer.write_index(&reason, current)
            }
        }
    }
}

/// Decide, for each relevant index, whether to keep or rewrite it.
///
/// `previous_metadata` is `None` for a full write, which rewrites every
/// relevant index. The result follows the order of `relevant`.
pub fn resolve_index_metadata_actions<'a>(
    previously_written: &BTreeMap<IndexId, Generation>,
    relevant: &BTreeSet<IndexId>,
    previous_metadata: Option<&'a Metadata>,
    new_metadata: &'a Metadata,
) -> Result<Vec<IndexMetadataAction<'a>>> {
    let mut actions = Vec::with_capacity(relevant.len());

    for index in relevant {
        let current = new_metadata.index_safe(index)?;
        let previous = previous_metadata.and_then(|m| m.index(index));

        let action = match (previously_written.get(index), previous) {
            (Some(&generation), Some(previous)) => {
                if previous.version == current.version {
                    IndexMetadataAction::KeepPreviousGeneration {
                        index: index.clone(),
                        generation,
                    }
                } else {
                    IndexMetadataAction::WriteChanged { previous, current }
                }
            }
            _ => IndexMetadataAction::WriteNew { metadata: current },
        };
        actions.push(action);
    }

    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fixtures::{index_id, index_meta};
    use crate::gateway::manifest::Manifest;
    use crate::store::{MemoryMetaStateService, StoreCall};
    use crate::utils::errors::MetaStateError;

    fn metadata(indices: &[IndexMetadata]) -> Metadata {
        let mut metadata = Metadata::default();
        for index in indices {
            metadata.put_index(index.clone());
        }
        metadata
    }

    fn relevant(names: &[&str]) -> BTreeSet<IndexId> {
        names.iter().map(|n| index_id(n)).collect()
    }

    #[test]
    fn test_version_change_is_rewritten() {
        let previous = metadata(&[index_meta("a", 1)]);
        let current = metadata(&[index_meta("a", 2)]);
        let written = BTreeMap::from([(index_id("a"), 4)]);

        let actions =
            resolve_index_metadata_actions(&written, &relevant(&["a"]), Some(&previous), &current)
                .unwrap();

        assert_eq!(
            actions,
            vec![IndexMetadataAction::WriteChanged {
                previous: &previous.indices["a"],
                current: &current.indices["a"],
            }]
        );
    }

    #[test]
    fn test_unchanged_index_keeps_generation() {
        let previous = metadata(&[index_meta("a", 3)]);
        let current = metadata(&[index_meta("a", 3)]);
        let written = BTreeMap::from([(index_id("a"), 7)]);

        let actions =
            resolve_index_metadata_actions(&written, &relevant(&["a"]), Some(&previous), &current)
                .unwrap();

        assert_eq!(
            actions,
            vec![IndexMetadataAction::KeepPreviousGeneration {
                index: index_id("a"),
                generation: 7
            }]
        );
    }

    #[test]
    fn test_never_written_index_is_new() {
        let previous = metadata(&[index_meta("a", 1)]);
        let current = metadata(&[index_meta("a", 1), index_meta("b", 1)]);
        let written = BTreeMap::from([(index_id("a"), 1)]);

        let relevant = relevant(&["a", "b"]);
        let actions =
            resolve_index_metadata_actions(&written, &relevant, Some(&previous), &current)
                .unwrap();

        assert!(matches!(actions[0], IndexMetadataAction::KeepPreviousGeneration { .. }));
        assert_eq!(
            actions[1],
            IndexMetadataAction::WriteNew {
                metadata: &current.indices["b"]
            }
        );
    }

    #[test]
    fn test_full_write_rewrites_everything() {
        let current = metadata(&[index_meta("a", 1), index_meta("b", 5)]);
        let written = BTreeMap::from([(index_id("a"), 1), (index_id("b"), 2)]);

        let actions =
            resolve_index_metadata_actions(&written, &relevant(&["a", "b"]), None, &current)
                .unwrap();

        assert!(actions
            .iter()
            .all(|a| matches!(a, IndexMetadataAction::WriteNew { .. })));
    }

    #[test]
    fn test_recreated_index_with_new_uuid_is_new() {
        let previous = metadata(&[index_meta("a", 9)]);
        let recreated = IndexMetadata::new(IndexId::new("a", "other-uuid"), 1);
        let current = metadata(&[recreated.clone()]);
        let written = BTreeMap::from([(index_id("a"), 3)]);
        let relevant = BTreeSet::from([recreated.index.clone()]);

        let actions =
            resolve_index_metadata_actions(&written, &relevant, Some(&previous), &current)
                .unwrap();

        assert_eq!(
            actions,
            vec![IndexMetadataAction::WriteNew {
                metadata: &current.indices["a"]
            }]
        );
    }

    #[test]
    fn test_relevant_index_missing_from_metadata() {
        let current = metadata(&[]);
        let relevant = relevant(&["gone"]);
        let result = resolve_index_metadata_actions(&BTreeMap::new(), &relevant, None, &current);

        assert!(matches!(result, Err(MetaStateError::IndexNotFound(id)) if id == index_id("gone")));
    }

    #[test]
    fn test_execute_uses_reason_and_counts_skips() {
        let store = MemoryMetaStateService::new();
        let previous_manifest = Manifest::empty();
        let previous = index_meta("a", 1);
        let current = index_meta("a", 2);
        let fresh = index_meta("b", 1);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous_manifest);
        let keep = IndexMetadataAction::KeepPreviousGeneration {
            index: index_id("c"),
            generation: 12,
        };
        assert_eq!(keep.execute(&mut writer).unwrap(), 12);
        IndexMetadataAction::WriteChanged {
            previous: &previous,
            current: &current,
        }
        .execute(&mut writer)
        .unwrap();
        IndexMetadataAction::WriteNew { metadata: &fresh }
            .execute(&mut writer)
            .unwrap();

        assert_eq!(writer.indices_skipped(), 1);
        assert_eq!(writer.indices_written(), 2);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::WriteIndex {
                    index: index_id("a"),
                    generation: 1
                },
                StoreCall::WriteIndex {
                    index: index_id("b"),
                    generation: 1
                },
            ]
        );
        writer.rollback();
    }
}
