//! Replay scheduler.
//!
//! Drives pending ledger rows into the target store in timeline order:
//! - Loads the mapping table and node identity maps once per run
//! - Recomputes the entity map from the ledger on every draining pass
//! - Marks each row migrated right after its target write succeeds
//! - Retries transient faults with linear backoff up to a cap
//!
//! # Example
//!
//! ```ignore
//! use wimigrate_core::replay::{ReplayConfig, Replayer};
//!
//! let config = ReplayConfig::new("Legacy", "Platform").with_legacy_links(true);
//! let report = Replayer::new(&mut ledger, &source, &target, &mapping, config)
//!     .run()
//!     .await?;
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod error;
pub mod report;
pub mod scheduler;
pub mod state;

pub use config::{ReplayConfig, DEFAULT_BACKOFF_BASE, DEFAULT_CHECKPOINT_EVERY, DEFAULT_MAX_RETRIES};
pub use error::ReplayError;
pub use report::{DeferredLink, InvalidEntity, RetryRecord, RunOutcome, RunReport};
pub use scheduler::Replayer;
pub use state::ReplayState;
