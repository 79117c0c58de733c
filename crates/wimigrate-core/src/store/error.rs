//! Store client errors.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by source and target store clients.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity problem or remote service fault; the call may succeed later.
    #[error("transient store fault: {0}")]
    Transient(String),

    /// The remote call did not complete in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The requested entity, node or attachment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the request (validation or permission failure).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Reading or writing a store snapshot failed.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// A store snapshot could not be decoded.
    #[error("snapshot format error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl StoreError {
    /// Check whether retrying the whole batch later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }

    /// Shorthand for a not-found error.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        StoreError::NotFound(what.to_string())
    }
}
