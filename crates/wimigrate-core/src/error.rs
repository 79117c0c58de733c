//! Crate-level error type.

use thiserror::Error;

use crate::discovery::SeedError;
use crate::ledger::LedgerError;
use crate::mapping::MappingError;
use crate::replay::ReplayError;
use crate::store::StoreError;
use crate::transform::UnmappedValueError;

/// Any error produced by the migration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Mapping table or node map error.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Store client error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Field transformation error.
    #[error("transform error: {0}")]
    Transform(#[from] UnmappedValueError),

    /// Ledger seeding error.
    #[error("seed error: {0}")]
    Seed(#[from] SeedError),

    /// Replay run error.
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
}

/// Result alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
