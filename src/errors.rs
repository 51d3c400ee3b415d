//! Store and Watch Subsystem Error Hierarchy
//!
//! Defines error types for the object store, its backends and the watch
//! admission/dispatch machinery.

use std::path::PathBuf;

use crate::Key;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key absent on a read or existence probe. Recoverable; routinely
    /// used to decide `Added` vs `Modified`.
    #[error("not found: {0}")]
    NotFound(Key),

    /// `create` on a live key. Surfaced to the caller, never retried.
    #[error("already exists: {0}")]
    AlreadyExists(Key),

    /// Admission ceiling reached. The caller decides backoff policy.
    #[error("max number of watchers reached")]
    ResourceExhausted,

    /// Subscription token fired or the watcher manager was stopped.
    #[error("watch cancelled")]
    Cancelled,

    /// Backend I/O and codec failures, propagated verbatim.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration validation failures.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Failures raised by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode failure for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode failure for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
