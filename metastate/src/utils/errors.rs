//! Error types for metastate.
//!
//! Store writes fail with [`WriteStateError`], which always says whether the
//! on-disk outcome is known (`Clean`) or ambiguous (`Dirty`). Everything else
//! the crate can fail with is a [`MetaStateError`].

use crate::model::IndexId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The write definitely did not persist.
    Clean,
    /// The write may or may not have persisted.
    Dirty,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Clean => write!(f, "clean"),
            FailureKind::Dirty => write!(f, "dirty"),
        }
    }
}

#[derive(Error, Debug)]
pub enum WriteStateError {
    #[error("{message}")]
    Clean {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message} (on-disk state is unknown)")]
    Dirty {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

impl WriteStateError {
    pub fn new(kind: FailureKind, message: impl Into<String>, source: std::io::Error) -> Self {
        let message = message.into();
        match kind {
            FailureKind::Clean => WriteStateError::Clean { message, source },
            FailureKind::Dirty => WriteStateError::Dirty { message, source },
        }
    }

    pub fn clean(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(FailureKind::Clean, message, source)
    }

    pub fn dirty(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(FailureKind::Dirty, message, source)
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            WriteStateError::Clean { .. } => FailureKind::Clean,
            WriteStateError::Dirty { .. } => FailureKind::Dirty,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.kind() == FailureKind::Dirty
    }
}

#[derive(Error, Debug)]
pub enum MetaStateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write state: {0}")]
    WriteState(#[from] WriteStateError),

    #[error("Corrupted state file {}: {reason}", path.display())]
    CorruptedState { path: PathBuf, reason: String },

    #[error("Missing state: {0}")]
    MissingState(String),

    #[error("Cluster state does not contain the local node [{0}]")]
    LocalNodeMissing(String),

    #[error("Index {0} not found in metadata")]
    IndexNotFound(IndexId),

    #[error("Fatal persistence failure, restart required: {0}")]
    Fatal(#[source] WriteStateError),
}

impl MetaStateError {
    /// True when the failure left the on-disk state ambiguous.
    pub fn is_dirty(&self) -> bool {
        match self {
            MetaStateError::WriteState(e) | MetaStateError::Fatal(e) => e.is_dirty(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetaStateError>;
