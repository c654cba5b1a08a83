//! Shared error type for Gas City operations.
//!
//! Every subsystem (bead store, event recorder, agent controller) returns
//! this same `Error`, so callers can branch on `NotFound` / `AlreadyClaimed`
//! regardless of which component raised them (spec §7). All variants are
//! explicit and recoverable; no panics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Shared error type for Gas City operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced record (bead, event, agent) does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// A `claim` lost the race to another assignee.
    #[error("bead '{id}' already claimed by '{assignee}'")]
    AlreadyClaimed { id: String, assignee: String },

    /// A bounded operation (subprocess call, watch poll) exceeded its deadline.
    #[error("operation '{operation}' timed out after {0:?}", .after)]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// Caller-supplied input was malformed.
    #[error("invalid input: {reason}")]
    Invalid { reason: String },

    /// A transient I/O or subprocess failure. The agent controller counts
    /// these against the per-agent failure window; callers elsewhere should
    /// surface the message but never retry inside the core.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("failed to read file '{path}'")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write file '{path}'")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory '{path}'")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error")]
    JsonParseFailed {
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an already-claimed error.
    pub fn already_claimed(id: impl Into<String>, assignee: impl Into<String>) -> Self {
        Self::AlreadyClaimed {
            id: id.into(),
            assignee: assignee.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an invalid-input error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Create a transient-failure error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a directory creation error.
    pub fn directory_creation_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreationFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(source: serde_json::Error) -> Self {
        Self::JsonParseFailed { source }
    }

    /// Whether this error is a `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is an `AlreadyClaimed`.
    pub fn is_already_claimed(&self) -> bool {
        matches!(self, Self::AlreadyClaimed { .. })
    }

    /// Whether this error should count against the controller's failure window.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::FileReadFailed { .. }
                | Self::FileWriteFailed { .. }
        )
    }
}
