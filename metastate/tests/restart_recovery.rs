//! Restart and recovery behaviour of the writer over the file store.

use metastate::config::WriterConfig;
use metastate::model::{ClusterState, DiscoveryNode, IndexId, IndexMetadata};
use metastate::store::FsMetaStateService;
use metastate::{IncrementalClusterStateWriter, MetaStateService};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

type Writer = IncrementalClusterStateWriter<FsMetaStateService>;

/// Freshly created index with a random uuid
fn index(name: &str, version: u64) -> IndexMetadata {
    IndexMetadata::new(IndexId::random(name), version)
}

fn bumped(meta: &IndexMetadata) -> IndexMetadata {
    IndexMetadata::new(meta.index.clone(), meta.version + 1)
}

fn master_state(version: u64, term: u64, indices: &[IndexMetadata]) -> ClusterState {
    let mut state = ClusterState {
        cluster_name: "recovery".to_string(),
        version,
        ..Default::default()
    };
    state.metadata.cluster_uuid = "cluster-1".to_string();
    state.metadata.coordination.term = term;
    state.nodes.local_node_id = "node-1".to_string();
    state.nodes.add(DiscoveryNode::new("node-1", true, true));
    for meta in indices {
        state.metadata.put_index(meta.clone());
    }
    state
}

fn open(dir: &Path) -> metastate::Result<Writer> {
    Writer::open(FsMetaStateService::new(dir), &WriterConfig::default())
}

fn manifest_files(dir: &Path) -> std::io::Result<usize> {
    Ok(std::fs::read_dir(dir.join("_state"))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("manifest-"))
        .count())
}

#[test]
fn test_state_survives_restart() -> metastate::Result<()> {
    let dir = TempDir::new()?;
    let state = master_state(3, 1, &[index("logs", 1), index("metrics", 2)]);

    let mut writer = open(dir.path())?;
    writer.update_cluster_state(Arc::new(state.clone()), &ClusterState::default())?;
    let manifest = writer.previous_manifest().clone();
    drop(writer);

    let reopened = open(dir.path())?;
    assert_eq!(reopened.previous_manifest(), &manifest);
    let recovered = reopened.previous_cluster_state();
    assert_eq!(recovered.version, 3);
    assert_eq!(recovered.metadata.cluster_uuid, "cluster-1");
    assert_eq!(recovered.metadata.indices, state.metadata.indices);
    Ok(())
}

#[test]
fn test_incremental_cycles_clean_up_old_generations() -> metastate::Result<()> {
    let dir = TempDir::new()?;
    let logs = index("logs", 1);
    let metrics = index("metrics", 1);
    let state = master_state(1, 1, &[logs.clone(), metrics.clone()]);

    let mut writer = open(dir.path())?;
    writer.update_cluster_state(Arc::new(state.clone()), &ClusterState::default())?;
    writer.set_incremental_write(true);

    let mut next = master_state(2, 1, &[bumped(&logs), metrics.clone()]);
    next.metadata
        .persistent_settings
        .insert("indices.recovery.max_bytes_per_sec".into(), "80mb".into());
    let stats = writer.update_cluster_state(Arc::new(next), &state)?;

    assert!(stats.global_written);
    assert_eq!((stats.indices_written, stats.indices_skipped), (1, 1));
    let store = writer.store();
    assert_eq!(store.index_generations_on_disk(&logs.index)?, vec![2]);
    assert_eq!(store.index_generations_on_disk(&metrics.index)?, vec![1]);
    assert_eq!(store.global_generations_on_disk()?, vec![2]);
    assert_eq!(manifest_files(dir.path())?, 1);
    Ok(())
}

#[test]
fn test_term_survives_restart() -> metastate::Result<()> {
    let dir = TempDir::new()?;
    let mut writer = open(dir.path())?;
    writer.update_cluster_state(Arc::new(master_state(1, 0, &[])), &ClusterState::default())?;
    writer.set_current_term(7)?;
    drop(writer);

    let reopened = open(dir.path())?;
    assert_eq!(reopened.previous_manifest().current_term, 7);
    assert_eq!(reopened.previous_manifest().cluster_state_version, 1);
    assert_eq!(manifest_files(dir.path())?, 1);
    Ok(())
}

#[test]
fn test_first_write_after_restart_is_full() -> metastate::Result<()> {
    let dir = TempDir::new()?;
    let logs = index("logs", 1);
    let state = master_state(1, 1, &[logs.clone()]);

    let mut writer = open(dir.path())?;
    writer.update_cluster_state(Arc::new(state.clone()), &ClusterState::default())?;
    drop(writer);

    let mut reopened = open(dir.path())?;
    let previous = Arc::clone(reopened.previous_cluster_state());
    let stats = reopened.update_cluster_state(Arc::new(state), &previous)?;

    assert!(stats.global_written && stats.manifest_written);
    assert_eq!(stats.indices_written, 1);
    assert_eq!(reopened.store().index_generations_on_disk(&logs.index)?, vec![2]);
    Ok(())
}

#[test]
fn test_uncommitted_index_is_reported_dangling() -> metastate::Result<()> {
    let dir = TempDir::new()?;
    let mut writer = open(dir.path())?;
    writer.update_cluster_state(
        Arc::new(master_state(1, 1, &[index("logs", 1)])),
        &ClusterState::default(),
    )?;

    // an index write whose manifest never made it to disk
    let orphan = index("orphan", 4);
    writer.store().write_index("freshly created", &orphan)?;

    let store = FsMetaStateService::new(dir.path());
    let (manifest, _) = store.load_full_state()?;
    let dangling = store.find_dangling_indices(&manifest)?;

    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].index, orphan.index);
    assert_eq!(dangling[0].generation, 1);
    Ok(())
}
