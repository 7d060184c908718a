//! Transactional wrapper around a [`MetaStateService`] for one update cycle.
//!
//! Every successful write queues a commit cleanup that removes the superseded
//! generation once the manifest referencing the new one is durable. Every
//! write also queues a rollback cleanup that removes the new generation if the
//! cycle is abandoned. Either the new manifest is committed and old files are
//! removed, or nothing new is referenced and orphans are removed. The only
//! exception is a dirty manifest failure, which is left as is.

use super::manifest::{Generation, Manifest};
use crate::model::{IndexId, IndexMetadata, Metadata};
use crate::store::MetaStateService;
use crate::utils::errors::WriteStateError;
use tracing::{debug, warn};

const FINISHED_MSG: &str = "AtomicClusterStateWriter is finished";

/// A pending cleanup: remove every generation of a unit except `keep`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cleanup {
    Global(Generation),
    Index(IndexId, Generation),
}

impl Cleanup {
    fn run<S: MetaStateService + ?Sized>(&self, store: &S) {
        match self {
            Cleanup::Global(keep) => store.cleanup_global_state(*keep),
            Cleanup::Index(index, keep) => store.cleanup_index(index, *keep),
        }
    }
}

pub struct AtomicClusterStateWriter<'a, S: MetaStateService + ?Sized> {
    store: &'a S,
    previous_manifest: &'a Manifest,
    commit_cleanups: Vec<Cleanup>,
    rollback_cleanups: Vec<Cleanup>,
    finished: bool,
    indices_written: usize,
    indices_skipped: usize,
}

impl<'a, S: MetaStateService + ?Sized> AtomicClusterStateWriter<'a, S> {
    pub fn new(store: &'a S, previous_manifest: &'a Manifest) -> Self {
        Self {
            store,
            previous_manifest,
            commit_cleanups: Vec::new(),
            rollback_cleanups: Vec::new(),
            finished: false,
            indices_written: 0,
            indices_skipped: 0,
        }
    }

    pub fn write_global_state(
        &mut self,
        reason: &str,
        metadata: &Metadata,
    ) -> Result<Generation, WriteStateError> {
        debug_assert!(!self.finished, "{}", FINISHED_MSG);

        self.rollback_cleanups
            .push(Cleanup::Global(self.previous_manifest.global_generation));
        match self.store.write_global_state(reason, metadata) {
            Ok(generation) => {
                self.commit_cleanups.push(Cleanup::Global(generation));
                Ok(generation)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    pub fn write_index(
        &mut self,
        reason: &str,
        metadata: &IndexMetadata,
    ) -> Result<Generation, WriteStateError> {
        debug_assert!(!self.finished, "{}", FINISHED_MSG);

        let index = &metadata.index;
        // A brand-new index has nothing to roll back to. Its file is left on
        // disk on failure so it can still be found as a dangling index.
        if let Some(previous) = self.previous_manifest.index_generation(index) {
            self.rollback_cleanups.push(Cleanup::Index(index.clone(), previous));
        }

        match self.store.write_index(reason, metadata) {
            Ok(generation) => {
                self.commit_cleanups.push(Cleanup::Index(index.clone(), generation));
                self.indices_written += 1;
                Ok(generation)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    /// Count an index whose previous generation is reused
    pub fn skip_index(&mut self) {
        self.indices_skipped += 1;
    }

    /// Write the manifest and, once it is durable, remove superseded generations.
    pub fn write_manifest_and_cleanup(
        &mut self,
        reason: &str,
        manifest: &Manifest,
    ) -> Result<(), WriteStateError> {
        debug_assert!(!self.finished, "{}", FINISHED_MSG);

        match self.store.write_manifest_and_cleanup(reason, manifest) {
            Ok(()) => {
                for cleanup in self.commit_cleanups.drain(..) {
                    cleanup.run(self.store);
                }
                self.finished = true;
                Ok(())
            }
            Err(e) => {
                // The manifest may be on disk referencing the new files, so
                // removing them could leave it pointing at nothing.
                if e.is_dirty() {
                    warn!(error = %e, "Dirty manifest write, leaving new state files in place");
                } else {
                    self.rollback();
                }
                Err(e)
            }
        }
    }

    /// Remove everything written in this transaction that nothing references.
    pub fn rollback(&mut self) {
        if !self.rollback_cleanups.is_empty() {
            debug!(cleanups = self.rollback_cleanups.len(), "Rolling back state writes");
        }
        for cleanup in self.rollback_cleanups.drain(..) {
            cleanup.run(self.store);
        }
        self.commit_cleanups.clear();
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn indices_written(&self) -> usize {
        self.indices_written
    }

    pub fn indices_skipped(&self) -> usize {
        self.indices_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IndexId, IndexMetadata, Metadata};
    use crate::store::{MemoryMetaStateService, StoreCall};
    use crate::utils::errors::FailureKind;
    use std::collections::BTreeMap;

    fn index(name: &str, version: u64) -> IndexMetadata {
        IndexMetadata::new(IndexId::new(name, format!("uuid-{}", name)), version)
    }

    /// Store already holding global generation 1 and `existing` at generation 1
    fn seeded(existing: &IndexMetadata) -> (MemoryMetaStateService, Manifest) {
        let store = MemoryMetaStateService::new();
        let global = store.write_global_state("seed", &Metadata::default()).unwrap();
        let generation = store.write_index("seed", existing).unwrap();
        let generations = BTreeMap::from([(existing.index.clone(), generation)]);
        let manifest = Manifest::new(1, 1, global, generations);
        store.write_manifest_and_cleanup("seed", &manifest).unwrap();
        store.clear_calls();
        (store, manifest)
    }

    #[test]
    fn test_commit_removes_superseded_generations() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        let global = writer.write_global_state("changed", &Metadata::default()).unwrap();
        let a_generation = writer.write_index("changed", &index("a", 2)).unwrap();
        let generations = BTreeMap::from([(a.index.clone(), a_generation)]);
        let manifest = Manifest::new(1, 2, global, generations);
        writer.write_manifest_and_cleanup("changed", &manifest).unwrap();

        assert!(writer.is_finished());
        assert_eq!(writer.indices_written(), 1);
        assert_eq!(store.global_generations(), vec![global]);
        assert_eq!(store.index_generations(&a.index), vec![a_generation]);
    }

    #[test]
    fn test_failed_index_write_rolls_back_earlier_writes() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);
        store.fail_next_index_write("b", FailureKind::Clean);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        let new_a = writer.write_index("changed", &index("a", 2)).unwrap();
        let err = writer.write_index("freshly created", &index("b", 1)).unwrap_err();

        assert!(!err.is_dirty());
        assert!(writer.is_finished());
        assert!(!store.index_generations(&a.index).contains(&new_a));
        assert_eq!(store.index_generations(&a.index), vec![1]);
        assert_eq!(
            store.calls().last(),
            Some(&StoreCall::CleanupIndex { index: a.index.clone(), keep: 1 })
        );
    }

    #[test]
    fn test_failed_global_write_rolls_back_to_previous_generation() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);
        store.fail_next_global_write(FailureKind::Clean);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        assert!(writer.write_global_state("changed", &Metadata::default()).is_err());

        assert!(store
            .calls()
            .contains(&StoreCall::CleanupGlobalState { keep: previous.global_generation }));
        assert_eq!(store.global_generations(), vec![previous.global_generation]);
    }

    #[test]
    fn test_new_index_is_not_cleaned_on_rollback() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);
        let fresh = index("fresh", 1);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        let generation = writer.write_index("freshly created", &fresh).unwrap();
        writer.rollback();

        assert_eq!(store.index_generations(&fresh.index), vec![generation]);
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::CleanupIndex { index, .. } if *index == fresh.index)));
    }

    #[test]
    fn test_clean_manifest_failure_rolls_back() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);
        store.fail_next_manifest_write(FailureKind::Clean);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        let new_a = writer.write_index("changed", &index("a", 2)).unwrap();
        let generations = BTreeMap::from([(a.index.clone(), new_a)]);
        let manifest = Manifest::new(1, 2, previous.global_generation, generations);
        let err = writer.write_manifest_and_cleanup("changed", &manifest).unwrap_err();

        assert!(!err.is_dirty());
        assert_eq!(store.index_generations(&a.index), vec![1]);
        assert_eq!(store.manifest(), Some(previous));
    }

    #[test]
    fn test_dirty_manifest_failure_keeps_new_files() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);
        store.fail_next_manifest_write(FailureKind::Dirty);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        let new_a = writer.write_index("changed", &index("a", 2)).unwrap();
        let generations = BTreeMap::from([(a.index.clone(), new_a)]);
        let manifest = Manifest::new(1, 2, previous.global_generation, generations);
        let err = writer.write_manifest_and_cleanup("changed", &manifest).unwrap_err();

        assert!(err.is_dirty());
        assert!(!store.calls().iter().any(StoreCall::is_cleanup));
        assert_eq!(store.index_generations(&a.index), vec![1, new_a]);
    }

    #[test]
    fn test_rollback_runs_once() {
        let a = index("a", 1);
        let (store, previous) = seeded(&a);

        let mut writer = AtomicClusterStateWriter::new(&store, &previous);
        writer.write_index("changed", &index("a", 2)).unwrap();
        writer.rollback();
        let cleanups = store.calls().iter().filter(|c| c.is_cleanup()).count();
        writer.rollback();

        assert_eq!(cleanups, 1);
        assert_eq!(store.calls().iter().filter(|c| c.is_cleanup()).count(), 1);
    }
}
