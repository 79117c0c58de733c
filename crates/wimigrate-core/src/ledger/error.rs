//! Ledger error types.

use thiserror::Error;

/// Errors raised by the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O failure while exporting ledger contents.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The ledger holds rows that violate its invariants.
    #[error("ledger corrupted: {message}")]
    Corrupted {
        /// Description of the offending rows.
        message: String,
    },

    /// No row with the given id.
    #[error("ledger row {op_id} not found")]
    OpNotFound {
        /// Row id.
        op_id: i64,
    },

    /// The row was already marked migrated; the transition is one-way.
    #[error("ledger row {op_id} is already migrated")]
    AlreadyMigrated {
        /// Row id.
        op_id: i64,
    },

    /// A creation row was marked migrated without the target id it produced.
    #[error("ledger row {op_id} creates an entity and needs a non-zero target id")]
    MissingTargetId {
        /// Row id.
        op_id: i64,
    },

    /// A target id was supplied for a row that does not create an entity.
    #[error("ledger row {op_id} does not create an entity; target id is assigned only at creation")]
    UnexpectedTargetId {
        /// Row id.
        op_id: i64,
    },
}

impl LedgerError {
    /// Shorthand for a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        LedgerError::Corrupted {
            message: message.into(),
        }
    }
}
