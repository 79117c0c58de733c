//! End-of-run report.

use std::path::Path;

use serde::Serialize;

use super::error::ReplayError;
use crate::model::EntityId;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every pending operation was processed.
    Completed,
    /// Transient faults exceeded the retry cap.
    RetriesExhausted,
    /// The ledger violates its invariants; nothing further was replayed.
    CorruptLedger {
        /// Offending row description.
        detail: String,
    },
    /// Shutdown was requested.
    Interrupted,
}

/// A row whose entity could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidEntity {
    /// Source entity id.
    pub source_entity_id: EntityId,
    /// Ledger row that failed.
    pub op_id: i64,
    /// Revision index of the row.
    pub revision_index: u32,
    /// Error text.
    pub error: String,
}

/// A link row still pending at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredLink {
    /// Ledger row.
    pub op_id: i64,
    /// Entity owning the row.
    pub source_entity_id: EntityId,
    /// Endpoint that was never migrated.
    pub other_end: EntityId,
}

/// A transient fault that triggered a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryRecord {
    /// 1-based retry number.
    pub attempt: u32,
    /// Error text.
    pub error: String,
}

/// Structured result of a replay run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Ledger scope replayed.
    pub scope: String,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Draining passes over the pending operations, across all attempts.
    pub passes: u32,
    /// Transient faults encountered.
    pub retries: u32,
    /// Operations dispatched.
    pub processed: u64,
    /// Operations marked migrated.
    pub migrated: u64,
    /// Link rows completed without creating a link.
    pub skipped_links: u64,
    /// Link rows left pending.
    pub deferred: Vec<DeferredLink>,
    /// Entities abandoned for this run.
    pub invalid: Vec<InvalidEntity>,
    /// Transient faults in order.
    pub exceptions: Vec<RetryRecord>,
    /// Wall-clock duration in seconds.
    pub elapsed_secs: f64,
}

impl RunReport {
    /// Create an empty report for a scope.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            outcome: RunOutcome::Completed,
            passes: 0,
            retries: 0,
            processed: 0,
            migrated: 0,
            skipped_links: 0,
            deferred: Vec::new(),
            invalid: Vec::new(),
            exceptions: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    /// Check whether the run completed.
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Check whether a source entity was abandoned.
    pub fn is_invalid(&self, source_entity_id: EntityId) -> bool {
        self.invalid
            .iter()
            .any(|entry| entry.source_entity_id == source_entity_id)
    }

    /// One-line exit summary.
    pub fn summary(&self) -> String {
        let outcome = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::RetriesExhausted => format!("aborted after {} retries", self.retries),
            RunOutcome::CorruptLedger { detail } => format!("aborted, corrupt ledger ({detail})"),
            RunOutcome::Interrupted => "interrupted".to_string(),
        };
        format!(
            "{}: {} migrated, {} deferred, {} invalid, {:.1}s elapsed",
            outcome,
            self.migrated,
            self.deferred.len(),
            self.invalid.len(),
            self.elapsed_secs
        )
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
