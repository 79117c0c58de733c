//! Durable operation ledger.
//!
//! The ledger is the single source of truth for migration progress:
//! - One row per source revision and per link event
//! - `migrated` flips false to true exactly once
//! - Target ids are assigned when an entity's creation row migrates
//! - The entity map is always recomputed from migrated creation rows
//!
//! # Example
//!
//! ```ignore
//! use wimigrate_core::ledger::Ledger;
//!
//! let mut ledger = Ledger::open("ledger.db")?;
//! for op in ledger.pending_ops("Legacy", &failed)? {
//!     // replay op, then
//!     ledger.mark_migrated(&op, target_id)?;
//! }
//! ```

pub mod error;
pub mod op;
pub mod store;

pub use error::LedgerError;
pub use op::{EntityMap, NewRevisionOp, OpDetail, OpKind, ParseOpError, RevisionOp};
pub use store::{Ledger, LedgerProgress};
