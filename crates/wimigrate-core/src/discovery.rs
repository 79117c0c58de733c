//! Ledger seeding.
//!
//! Crawls a source project and writes one pending ledger row per revision
//! and per active link. Re-running skips entities already in the ledger.

use thiserror::Error;
use tracing::{debug, info};

use crate::ledger::{Ledger, LedgerError, NewRevisionOp, OpDetail};
use crate::model::SourceEntity;
use crate::store::{SourceStore, StoreError};

/// Entities whose rows are committed per transaction.
pub const SEED_BATCH_SIZE: usize = 100;

/// Errors during ledger seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The source store failed.
    #[error("source store error: {0}")]
    Store(#[from] StoreError),

    /// The ledger failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Counters from a seeding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Entities written to the ledger.
    pub entities: usize,
    /// Entities skipped because the ledger already holds them.
    pub skipped: usize,
    /// Revision rows written.
    pub revision_rows: usize,
    /// Link rows written.
    pub link_rows: usize,
}

impl SeedSummary {
    /// Total rows written.
    pub fn rows(&self) -> usize {
        self.revision_rows + self.link_rows
    }
}

/// Ledger rows for one entity: every revision, then every still-active link.
pub fn entity_rows(entity: &SourceEntity, scope: &str) -> Vec<NewRevisionOp> {
    let revision_count = (entity.revisions.len() + entity.links.len()) as u32;
    let mut rows = Vec::with_capacity(entity.revisions.len() + entity.links.len());

    for (index, revision) in entity.revisions.iter().enumerate() {
        let previous = index.checked_sub(1).and_then(|i| entity.revisions.get(i));
        rows.push(NewRevisionOp {
            source_entity_id: entity.id,
            revision_index: index as u32,
            revision_count,
            changed_at: revision.changed_at,
            scope: scope.to_string(),
            detail: OpDetail::Revision {
                changed_fields: revision.changed_fields(previous),
            },
        });
    }

    let base = entity.revisions.len();
    for (position, link) in entity.links.iter().enumerate() {
        if !link.is_active() {
            continue;
        }
        let Some(other_end) = link.other_end(entity.id) else {
            continue;
        };
        rows.push(NewRevisionOp {
            source_entity_id: entity.id,
            revision_index: (base + position) as u32,
            revision_count,
            changed_at: link.added_at,
            scope: scope.to_string(),
            detail: OpDetail::Link { other_end },
        });
    }
    rows
}

/// Seed the ledger with every entity of the source project under `scope`.
///
/// An entity's rows always land in the same transaction, so a re-run never
/// finds a partially seeded entity.
pub async fn seed_ledger<S>(source: &S, ledger: &mut Ledger, scope: &str) -> Result<SeedSummary, SeedError>
where
    S: SourceStore + ?Sized,
{
    let ids = source.list_entities().await?;
    info!(scope, project = source.project(), entities = ids.len(), "seeding ledger");

    let mut summary = SeedSummary::default();
    let mut batch: Vec<NewRevisionOp> = Vec::new();
    let mut batched = 0;

    for id in ids {
        if ledger.contains_entity(scope, id)? {
            debug!(entity = id, "already in ledger");
            summary.skipped += 1;
            continue;
        }

        let entity = source.fetch_entity(id).await?;
        let rows = entity_rows(&entity, scope);
        summary.entities += 1;
        for row in &rows {
            match row.detail {
                OpDetail::Revision { .. } => summary.revision_rows += 1,
                OpDetail::Link { .. } => summary.link_rows += 1,
            }
        }
        batch.extend(rows);
        batched += 1;

        if batched == SEED_BATCH_SIZE {
            ledger.append(&batch)?;
            batch.clear();
            batched = 0;
            info!(scope, seeded = summary.entities, "seed batch committed");
        }
    }
    if !batch.is_empty() {
        ledger.append(&batch)?;
    }

    info!(
        scope,
        entities = summary.entities,
        skipped = summary.skipped,
        rows = summary.rows(),
        "ledger seeded"
    );
    Ok(summary)
}
