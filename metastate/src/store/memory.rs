//! In-memory metadata store.
//!
//! Keeps every generation in memory, records each call it receives and can be
//! told to fail the next write of a given unit, cleanly or dirtily. Used to
//! drive the writer through failure paths without touching a disk.

use super::MetaStateService;
use crate::gateway::manifest::{Generation, Manifest};
use crate::model::{GlobalState, IndexId, IndexMetadata, Metadata};
use crate::utils::errors::{FailureKind, MetaStateError, Result, WriteStateError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;

/// One call received by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    WriteGlobalState { generation: Generation },
    WriteIndex { index: IndexId, generation: Generation },
    WriteManifest { manifest: Manifest },
    CleanupGlobalState { keep: Generation },
    CleanupIndex { index: IndexId, keep: Generation },
    FailedWrite { target: String, kind: FailureKind },
}

impl StoreCall {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreCall::WriteGlobalState { .. }
                | StoreCall::WriteIndex { .. }
                | StoreCall::WriteManifest { .. }
        )
    }

    pub fn is_cleanup(&self) -> bool {
        matches!(self, StoreCall::CleanupGlobalState { .. } | StoreCall::CleanupIndex { .. })
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_generation: HashMap<String, Generation>,
    global: BTreeMap<Generation, GlobalState>,
    indices: BTreeMap<IndexId, BTreeMap<Generation, IndexMetadata>>,
    manifests: BTreeMap<Generation, Manifest>,
    calls: Vec<StoreCall>,
    fail_global: Option<FailureKind>,
    fail_index: HashMap<String, FailureKind>,
    fail_manifest: Option<FailureKind>,
}

impl Inner {
    fn next_generation(&mut self, unit: &str) -> Generation {
        let next = self.next_generation.entry(unit.to_string()).or_insert(1);
        let generation = *next;
        *next += 1;
        generation
    }

    fn fail(&mut self, target: String, kind: FailureKind) -> WriteStateError {
        let message = format!("injected failure writing {}", target);
        self.calls.push(StoreCall::FailedWrite { target, kind });
        WriteStateError::new(kind, message, io::Error::other("injected"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryMetaStateService {
    inner: Mutex<Inner>,
}

impl MemoryMetaStateService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next global state write fail
    pub fn fail_next_global_write(&self, kind: FailureKind) {
        self.inner.lock().fail_global = Some(kind);
    }

    /// Make the next write of the index named `index_name` fail
    pub fn fail_next_index_write(&self, index_name: &str, kind: FailureKind) {
        self.inner.lock().fail_index.insert(index_name.to_string(), kind);
    }

    /// Make the next manifest write fail. A dirty failure still stores the
    /// manifest, as a real disk may have.
    pub fn fail_next_manifest_write(&self, kind: FailureKind) {
        self.inner.lock().fail_manifest = Some(kind);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    /// Number of successful writes of any kind since the last `clear_calls`
    pub fn write_count(&self) -> usize {
        self.inner.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    pub fn global_generations(&self) -> Vec<Generation> {
        self.inner.lock().global.keys().copied().collect()
    }

    pub fn index_generations(&self, index: &IndexId) -> Vec<Generation> {
        self.inner
            .lock()
            .indices
            .get(index)
            .map(|generations| generations.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Newest stored manifest
    pub fn manifest(&self) -> Option<Manifest> {
        self.inner.lock().manifests.values().next_back().cloned()
    }
}

impl MetaStateService for MemoryMetaStateService {
    fn write_global_state(
        &self,
        _reason: &str,
        metadata: &Metadata,
    ) -> std::result::Result<Generation, WriteStateError> {
        let mut inner = self.inner.lock();
        if let Some(kind) = inner.fail_global.take() {
            return Err(inner.fail("global state".to_string(), kind));
        }

        let generation = inner.next_generation("global");
        inner.global.insert(generation, metadata.global_state());
        inner.calls.push(StoreCall::WriteGlobalState { generation });
        Ok(generation)
    }

    fn write_index(
        &self,
        _reason: &str,
        metadata: &IndexMetadata,
    ) -> std::result::Result<Generation, WriteStateError> {
        let mut inner = self.inner.lock();
        if let Some(kind) = inner.fail_index.remove(&metadata.index.name) {
            return Err(inner.fail(format!("index {}", metadata.index), kind));
        }

        let generation = inner.next_generation(&format!("index/{}", metadata.index.uuid));
        inner
            .indices
            .entry(metadata.index.clone())
            .or_default()
            .insert(generation, metadata.clone());
        inner.calls.push(StoreCall::WriteIndex {
            index: metadata.index.clone(),
            generation,
        });
        Ok(generation)
    }

    fn write_manifest_and_cleanup(
        &self,
        _reason: &str,
        manifest: &Manifest,
    ) -> std::result::Result<(), WriteStateError> {
        let mut inner = self.inner.lock();
        let failure = inner.fail_manifest.take();

        if failure != Some(FailureKind::Clean) {
            let generation = inner.next_generation("manifest");
            inner.manifests.insert(generation, manifest.clone());
            inner.manifests.retain(|g, _| *g == generation);
        }

        match failure {
            Some(kind) => Err(inner.fail("manifest".to_string(), kind)),
            None => {
                inner.calls.push(StoreCall::WriteManifest {
                    manifest: manifest.clone(),
                });
                Ok(())
            }
        }
    }

    fn cleanup_global_state(&self, keep: Generation) {
        let mut inner = self.inner.lock();
        inner.global.retain(|g, _| *g == keep);
        inner.calls.push(StoreCall::CleanupGlobalState { keep });
    }

    fn cleanup_index(&self, index: &IndexId, keep: Generation) {
        let mut inner = self.inner.lock();
        let now_empty = match inner.indices.get_mut(index) {
            Some(generations) => {
                generations.retain(|g, _| *g == keep);
                generations.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.indices.remove(index);
        }
        inner.calls.push(StoreCall::CleanupIndex {
            index: index.clone(),
            keep,
        });
    }

    fn load_full_state(&self) -> Result<(Manifest, Metadata)> {
        let inner = self.inner.lock();
        let Some(manifest) = inner.manifests.values().next_back().cloned() else {
            return Ok((Manifest::empty(), Metadata::default()));
        };

        let global = if manifest.is_global_generation_missing() {
            GlobalState::default()
        } else {
            inner
                .global
                .get(&manifest.global_generation)
                .cloned()
                .ok_or_else(|| {
                    MetaStateError::MissingState(format!(
                        "global [generation: {}]",
                        manifest.global_generation
                    ))
                })?
        };

        let mut indices = Vec::with_capacity(manifest.index_generations.len());
        for (index, generation) in &manifest.index_generations {
            let meta = inner
                .indices
                .get(index)
                .and_then(|generations| generations.get(generation))
                .cloned()
                .ok_or_else(|| {
                    MetaStateError::MissingState(format!(
                        "index {} [generation: {}]",
                        index, generation
                    ))
                })?;
            indices.push(meta);
        }

        Ok((manifest, Metadata::from_parts(global, indices)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_are_per_unit() {
        let store = MemoryMetaStateService::new();
        let a = IndexMetadata::new(IndexId::new("a", "ua"), 1);
        let b = IndexMetadata::new(IndexId::new("b", "ub"), 1);

        assert_eq!(store.write_index("t", &a).unwrap(), 1);
        assert_eq!(store.write_index("t", &a).unwrap(), 2);
        assert_eq!(store.write_index("t", &b).unwrap(), 1);
        assert_eq!(store.write_global_state("t", &Metadata::default()).unwrap(), 1);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let store = MemoryMetaStateService::new();
        let a = IndexMetadata::new(IndexId::new("a", "ua"), 1);

        store.fail_next_index_write("a", FailureKind::Clean);
        let err = store.write_index("t", &a).unwrap_err();
        assert!(!err.is_dirty());
        assert!(store.write_index("t", &a).is_ok());
    }

    #[test]
    fn test_dirty_manifest_failure_still_stores_manifest() {
        let store = MemoryMetaStateService::new();
        let manifest = Manifest::empty().with_current_term(3);

        store.fail_next_manifest_write(FailureKind::Dirty);
        assert!(store.write_manifest_and_cleanup("t", &manifest).unwrap_err().is_dirty());
        assert_eq!(store.manifest(), Some(manifest));

        store.fail_next_manifest_write(FailureKind::Clean);
        let next = Manifest::empty().with_current_term(4);
        assert!(store.write_manifest_and_cleanup("t", &next).is_err());
        assert_eq!(store.manifest().map(|m| m.current_term), Some(3));
    }

    #[test]
    fn test_cleanup_keeps_requested_generation() {
        let store = MemoryMetaStateService::new();
        let a = IndexMetadata::new(IndexId::new("a", "ua"), 1);
        store.write_index("t", &a).unwrap();
        let keep = store.write_index("t", &a).unwrap();

        store.cleanup_index(&a.index, keep);
        assert_eq!(store.index_generations(&a.index), vec![keep]);
    }
}
