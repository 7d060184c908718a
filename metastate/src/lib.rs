//! Metastate Library
//!
//! Crash-safe, incremental persistence of cluster metadata to local disk.
//! Each update cycle writes only the global and per-index metadata that
//! changed, then commits a manifest that points at the valid generations.

pub mod config;
pub mod gateway;
pub mod model;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use gateway::incremental::{IncrementalClusterStateWriter, WriteStats, WriterState};
pub use gateway::manifest::{Generation, Manifest, NO_GENERATION};
pub use store::MetaStateService;
pub use utils::errors::{FailureKind, MetaStateError, WriteStateError};
pub type Result<T> = std::result::Result<T, MetaStateError>;
