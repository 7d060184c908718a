//! Metastate Tool - Main entry point
//!
//! Inspect and update the cluster metadata persisted under a data directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metastate::model::ClusterState;
use metastate::store::FsMetaStateService;
use metastate::{utils, Config, IncrementalClusterStateWriter, MetaStateService};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(short, long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the committed manifest, the metadata it references and any dangling indices
    Inspect,

    /// Persist a cluster state read from a JSON file
    Apply {
        /// Cluster state document
        #[arg(short, long, value_name = "FILE")]
        state: PathBuf,

        /// Rewrite everything instead of only what changed
        #[arg(long)]
        full: bool,
    },

    /// Record a new current term in the manifest
    SetTerm { term: u64 },
}

fn main() -> Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "metastate-tool v{} (node_id: {}, data_dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.node.id,
        config.storage.data_dir.display()
    );

    let store = FsMetaStateService::new(&config.storage.data_dir);
    match args.command {
        Command::Inspect => inspect(&store),
        Command::Apply { state, full } => apply(store, &config, state, full),
        Command::SetTerm { term } => {
            let mut writer = IncrementalClusterStateWriter::open(store, &config.writer)?;
            writer.set_current_term(term)?;
            tracing::info!("Current term set to {}", term);
            Ok(())
        }
    }
}

fn inspect(store: &FsMetaStateService) -> Result<()> {
    let (manifest, metadata) = store.load_full_state()?;
    let dangling = store.find_dangling_indices(&manifest)?;

    let indices: Vec<_> = manifest
        .index_generations
        .iter()
        .map(|(index, generation)| {
            let meta = metadata.index(index);
            json!({
                "index": index.to_string(),
                "generation": generation,
                "version": meta.map(|m| m.version),
                "state": meta.map(|m| m.state),
            })
        })
        .collect();
    let dangling: Vec<_> = dangling
        .iter()
        .map(|d| {
            json!({
                "index": d.index.to_string(),
                "generation": d.generation,
                "path": d.path.display().to_string(),
            })
        })
        .collect();

    let report = json!({
        "manifest": manifest,
        "cluster_uuid": metadata.cluster_uuid,
        "indices": indices,
        "dangling": dangling,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn apply(
    store: FsMetaStateService,
    config: &Config,
    state_path: PathBuf,
    full: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(&state_path)
        .with_context(|| format!("failed to read {}", state_path.display()))?;
    let mut new_state: ClusterState = serde_json::from_str(&content)?;
    if new_state.nodes.local_node_id.is_empty() {
        new_state.nodes.local_node_id = config.node.id.clone();
    }

    let mut writer = IncrementalClusterStateWriter::open(store, &config.writer)?;
    writer.set_incremental_write(!full);
    let previous = Arc::clone(writer.previous_cluster_state());
    let stats = writer.update_cluster_state(Arc::new(new_state), &previous)?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
