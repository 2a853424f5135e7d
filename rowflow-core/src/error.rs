//! Error types for rowflow pipelines

use std::io;
use thiserror::Error;

/// Result type for rowflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rowflow operations
#[derive(Error, Debug)]
pub enum Error {
    /// A construction call received an invalid argument; no node was produced
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid parameter combination detected after construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// Column, shape or name mismatch across the tree
    #[error("Schema error: {0}")]
    Schema(String),

    /// IO error while reading a source
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Source exists but its content could not be interpreted
    #[error("Malformed source {location}: {reason}")]
    Malformed {
        /// Path or name of the source
        location: String,
        /// What was wrong with it
        reason: String,
    },

    /// A transform call failed
    #[error("Transform '{op}' failed: {source}")]
    Transform {
        /// Name of the failing operation
        op: String,
        /// Error reported by the operation
        source: anyhow::Error,
    },

    /// Memory budget exceeded
    #[error("Memory budget exceeded: requested {requested} bytes, available {available} bytes")]
    MemoryBudgetExceeded {
        /// Requested memory in bytes
        requested: usize,
        /// Available memory in bytes
        available: usize,
    },

    /// A worker stopped without delivering end-of-stream
    #[error("Pipeline execution error: {0}")]
    Pipeline(String),

    /// Operation not allowed in the current iterator state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The pipeline already failed; the original error was returned earlier
    #[error("Pipeline terminated after an earlier failure: {0}")]
    Terminated(String),
}

/// The four error tiers a caller can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid parameters or API misuse
    Config,
    /// Column/name/shape mismatch
    Schema,
    /// Source unreadable or malformed
    Io,
    /// Failure while rows were flowing
    Runtime,
}

impl Error {
    /// Classify this error into one of the four tiers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) | Error::InvalidOperation(_) => {
                ErrorKind::Config
            }
            Error::Schema(_) => ErrorKind::Schema,
            Error::Io(_) | Error::Malformed { .. } => ErrorKind::Io,
            Error::Transform { .. }
            | Error::MemoryBudgetExceeded { .. }
            | Error::Pipeline(_)
            | Error::Terminated(_) => ErrorKind::Runtime,
        }
    }

    /// Shorthand for a malformed-source error
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
