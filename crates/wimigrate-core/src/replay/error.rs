//! Replay error types.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::mapping::MappingError;
use crate::store::StoreError;

/// Errors that stop a replay run before or outside the retry envelope.
///
/// Row-level faults and transient store faults never surface here; they are
/// recorded in the [`RunReport`](super::RunReport).
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The run configuration violates a structural precondition.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Ledger access failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Mapping tables or node maps could not be built.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// A store call failed while loading run state.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The run report could not be written.
    #[error("report error: {0}")]
    Report(#[from] std::io::Error),

    /// The run report could not be serialized.
    #[error("report serialization error: {0}")]
    ReportFormat(#[from] serde_json::Error),
}
