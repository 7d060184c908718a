//! Utility modules for metastate.

pub mod errors;
pub mod logger;

pub use errors::{FailureKind, MetaStateError, Result, WriteStateError};
