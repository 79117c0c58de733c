//! SQLite-backed ledger of replay operations.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::LedgerError;
use super::op::{EntityMap, NewRevisionOp, OpDetail, OpKind, RevisionOp};
use crate::model::EntityId;

const SELECT_COLUMNS: &str = "id, source_entity_id, target_entity_id, revision_index, \
     revision_count, migrated, changed_at, kind, changed_fields, scope";

/// Counters describing replay progress for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerProgress {
    /// Rows in the scope.
    pub total: u64,
    /// Rows already replayed.
    pub migrated: u64,
    /// Revision rows still pending.
    pub pending_revisions: u64,
    /// Link rows still pending.
    pub pending_links: u64,
}

impl LedgerProgress {
    /// Calculate percentage complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.migrated as f64 / self.total as f64) * 100.0
        }
    }
}

/// Durable table of revision/link operations and their migration status.
///
/// The ledger is the only record of progress. Rows are never deleted and the
/// `migrated` flag only moves from false to true.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Table holding the operation rows.
    pub const TABLE: &'static str = "work_item_revisions";

    /// Open or create a ledger database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let ledger = Self { conn };
        ledger.bootstrap()?;
        Ok(ledger)
    }

    /// Open a throwaway in-memory ledger.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let ledger = Self {
            conn: Connection::open_in_memory()?,
        };
        ledger.bootstrap()?;
        Ok(ledger)
    }

    fn bootstrap(&self) -> Result<(), LedgerError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_item_revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_entity_id INTEGER NOT NULL,
                target_entity_id INTEGER NOT NULL DEFAULT 0,
                revision_index INTEGER NOT NULL,
                revision_count INTEGER NOT NULL,
                migrated INTEGER NOT NULL DEFAULT 0,
                changed_at TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('revision', 'link')),
                changed_fields TEXT NOT NULL DEFAULT '',
                scope TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_revisions_pending
                ON work_item_revisions(scope, migrated, changed_at, revision_index);
            CREATE INDEX IF NOT EXISTS idx_revisions_entity
                ON work_item_revisions(source_entity_id, revision_index);
            "#,
        )?;
        Ok(())
    }

    /// Append rows in a single transaction. Returns the number of rows written.
    pub fn append(&mut self, ops: &[NewRevisionOp]) -> Result<usize, LedgerError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO work_item_revisions \
                 (source_entity_id, revision_index, revision_count, changed_at, kind, changed_fields, scope) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for op in ops {
                stmt.execute(params![
                    op.source_entity_id,
                    op.revision_index,
                    op.revision_count,
                    encode_timestamp(&op.changed_at),
                    op.detail.kind().as_str(),
                    op.detail.fingerprint(),
                    op.scope,
                ])?;
            }
        }
        tx.commit()?;
        Ok(ops.len())
    }

    /// Check whether any row exists for an entity in a scope.
    pub fn contains_entity(&self, scope: &str, source_entity_id: EntityId) -> Result<bool, LedgerError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM work_item_revisions WHERE scope = ?1 AND source_entity_id = ?2 LIMIT 1",
                params![scope, source_entity_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a row by id.
    pub fn get(&self, op_id: i64) -> Result<Option<RevisionOp>, LedgerError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM work_item_revisions WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![op_id], map_row).optional()?)
    }

    /// Pending rows of a scope in timeline order.
    ///
    /// Sorted by `(changed_at, revision_index)` with the surrogate id as a final
    /// tie-breaker. Rows of entities in `failed` are left out.
    pub fn pending_ops(
        &self,
        scope: &str,
        failed: &HashSet<EntityId>,
    ) -> Result<Vec<RevisionOp>, LedgerError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM work_item_revisions \
             WHERE scope = ?1 AND migrated = 0 \
             ORDER BY changed_at ASC, revision_index ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scope], map_row)?;

        let mut ops = Vec::new();
        for row in rows {
            let op = row?;
            if !failed.contains(&op.source_entity_id) {
                ops.push(op);
            }
        }
        Ok(ops)
    }

    /// All rows of a scope in insertion order.
    pub fn ops(&self, scope: &str) -> Result<Vec<RevisionOp>, LedgerError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM work_item_revisions WHERE scope = ?1 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scope], map_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record that a row has been replayed.
    ///
    /// Creation rows must pass the target id the save produced; every other row
    /// must pass `None`. The update is a single committed statement.
    pub fn mark_migrated(
        &mut self,
        op: &RevisionOp,
        target_entity_id: Option<EntityId>,
    ) -> Result<(), LedgerError> {
        match (op.is_creation(), target_entity_id) {
            (true, Some(id)) if id != 0 => {}
            (true, _) => return Err(LedgerError::MissingTargetId { op_id: op.id }),
            (false, Some(_)) => return Err(LedgerError::UnexpectedTargetId { op_id: op.id }),
            (false, None) => {}
        }

        let updated = self.conn.execute(
            "UPDATE work_item_revisions \
             SET migrated = 1, target_entity_id = COALESCE(?2, target_entity_id) \
             WHERE id = ?1 AND migrated = 0",
            params![op.id, target_entity_id],
        )?;

        if updated == 0 {
            return match self.get(op.id)? {
                Some(_) => Err(LedgerError::AlreadyMigrated { op_id: op.id }),
                None => Err(LedgerError::OpNotFound { op_id: op.id }),
            };
        }
        Ok(())
    }

    /// Current entity map, computed from migrated creation rows.
    ///
    /// With `scope = None` the map spans every scope in the ledger.
    pub fn entity_map(&self, scope: Option<&str>) -> Result<EntityMap, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT source_entity_id, target_entity_id FROM work_item_revisions \
             WHERE migrated = 1 AND revision_index = 0 AND kind = 'revision' \
             AND target_entity_id != 0 AND (?1 IS NULL OR scope = ?1)",
        )?;
        let rows = stmt.query_map(params![scope], |row| {
            Ok((row.get::<_, EntityId>(0)?, row.get::<_, EntityId>(1)?))
        })?;
        Ok(rows.collect::<Result<EntityMap, _>>()?)
    }

    /// Force pending writes into the main database file.
    pub fn checkpoint(&self) -> Result<(), LedgerError> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Distinct scopes present in the ledger.
    pub fn scopes(&self) -> Result<Vec<String>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT scope FROM work_item_revisions ORDER BY scope")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Progress counters for a scope.
    pub fn progress(&self, scope: &str) -> Result<LedgerProgress, LedgerError> {
        let progress = self.conn.query_row(
            "SELECT COUNT(*), \
                COALESCE(SUM(migrated), 0), \
                COALESCE(SUM(CASE WHEN migrated = 0 AND kind = 'revision' THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN migrated = 0 AND kind = 'link' THEN 1 ELSE 0 END), 0) \
             FROM work_item_revisions WHERE scope = ?1",
            params![scope],
            |row| {
                Ok(LedgerProgress {
                    total: row.get(0)?,
                    migrated: row.get(1)?,
                    pending_revisions: row.get(2)?,
                    pending_links: row.get(3)?,
                })
            },
        )?;
        Ok(progress)
    }

    /// Check the ledger invariants for a scope.
    ///
    /// Fails with [`LedgerError::Corrupted`] when a migrated creation row has no
    /// target id, when a later revision migrated before its entity's creation
    /// row, or when a revision migrated while an earlier one is still pending.
    pub fn verify_shape(&self, scope: &str) -> Result<(), LedgerError> {
        let missing_target: Option<(i64, EntityId)> = self
            .conn
            .query_row(
                "SELECT id, source_entity_id FROM work_item_revisions \
                 WHERE scope = ?1 AND kind = 'revision' AND revision_index = 0 \
                 AND migrated = 1 AND target_entity_id = 0 LIMIT 1",
                params![scope],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((op_id, entity)) = missing_target {
            return Err(LedgerError::corrupted(format!(
                "row {op_id}: entity {entity} creation migrated without a target id"
            )));
        }

        let orphan: Option<(i64, EntityId, u32)> = self
            .conn
            .query_row(
                "SELECT r.id, r.source_entity_id, r.revision_index FROM work_item_revisions r \
                 WHERE r.scope = ?1 AND r.kind = 'revision' AND r.revision_index > 0 AND r.migrated = 1 \
                 AND NOT EXISTS (SELECT 1 FROM work_item_revisions c \
                     WHERE c.source_entity_id = r.source_entity_id AND c.scope = r.scope \
                     AND c.kind = 'revision' AND c.revision_index = 0 AND c.migrated = 1) \
                 LIMIT 1",
                params![scope],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        if let Some((op_id, entity, index)) = orphan {
            return Err(LedgerError::corrupted(format!(
                "row {op_id}: entity {entity} revision {index} migrated but its creation row is not"
            )));
        }

        let gap: Option<(i64, EntityId, u32)> = self
            .conn
            .query_row(
                "SELECT r.id, r.source_entity_id, r.revision_index FROM work_item_revisions r \
                 WHERE r.scope = ?1 AND r.kind = 'revision' AND r.migrated = 1 \
                 AND EXISTS (SELECT 1 FROM work_item_revisions e \
                     WHERE e.source_entity_id = r.source_entity_id AND e.scope = r.scope \
                     AND e.kind = 'revision' AND e.revision_index < r.revision_index AND e.migrated = 0) \
                 LIMIT 1",
                params![scope],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        if let Some((op_id, entity, index)) = gap {
            return Err(LedgerError::corrupted(format!(
                "row {op_id}: entity {entity} revision {index} migrated ahead of an earlier revision"
            )));
        }

        Ok(())
    }

    /// Write the entity map as `Source ID|Target ID` lines.
    ///
    /// Returns the number of mapped entities written.
    pub fn write_entity_map(&self, mut writer: impl Write) -> Result<usize, LedgerError> {
        let map = self.entity_map(None)?;
        writeln!(writer, "Source ID|Target ID")?;
        for (source, target) in map.iter() {
            writeln!(writer, "{source}|{target}")?;
        }
        writer.flush()?;
        Ok(map.len())
    }
}

/// Encode a timestamp as fixed-width RFC 3339 text so lexical order is
/// chronological order.
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<RevisionOp> {
    let changed_at: String = row.get(6)?;
    let changed_at = DateTime::parse_from_rfc3339(&changed_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let kind: String = row.get(7)?;
    let kind: OpKind = kind
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    let fingerprint: String = row.get(8)?;
    let detail = OpDetail::parse(kind, &fingerprint)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(RevisionOp {
        id: row.get(0)?,
        source_entity_id: row.get(1)?,
        target_entity_id: row.get(2)?,
        revision_index: row.get(3)?,
        revision_count: row.get(4)?,
        migrated: row.get(5)?,
        changed_at,
        scope: row.get(9)?,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_440_000_000 + secs, 0).unwrap()
    }

    fn revision(entity: EntityId, index: u32, at: i64) -> NewRevisionOp {
        NewRevisionOp {
            source_entity_id: entity,
            revision_index: index,
            revision_count: 3,
            changed_at: ts(at),
            scope: "Legacy".to_string(),
            detail: OpDetail::Revision {
                changed_fields: vec!["System.Title".to_string()],
            },
        }
    }

    fn link(entity: EntityId, index: u32, other: EntityId, at: i64) -> NewRevisionOp {
        NewRevisionOp {
            detail: OpDetail::Link { other_end: other },
            ..revision(entity, index, at)
        }
    }

    fn seeded() -> Ledger {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append(&[
                revision(101, 0, 1),
                revision(101, 1, 3),
                revision(102, 0, 2),
                link(101, 2, 102, 4),
            ])
            .unwrap();
        ledger
    }

    #[test]
    fn test_pending_ops_timeline_order() {
        let ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();

        let order: Vec<(EntityId, u32)> = ops
            .iter()
            .map(|op| (op.source_entity_id, op.revision_index))
            .collect();
        assert_eq!(order, vec![(101, 0), (102, 0), (101, 1), (101, 2)]);
        assert_eq!(ops[3].link_other_end(), Some(102));
        assert!(ops.iter().all(|op| !op.migrated && op.target_entity_id == 0));
    }

    #[test]
    fn test_equal_timestamps_order_by_revision_index() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger
            .append(&[revision(7, 1, 5), revision(7, 0, 5)])
            .unwrap();

        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        assert_eq!(ops[0].revision_index, 0);
        assert_eq!(ops[1].revision_index, 1);
    }

    #[test]
    fn test_pending_ops_excludes_failed_entities() {
        let ledger = seeded();
        let failed: HashSet<EntityId> = [101].into_iter().collect();

        let ops = ledger.pending_ops("Legacy", &failed).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].source_entity_id, 102);
        assert!(ledger.pending_ops("Other", &HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_mark_migrated_assigns_target_once() {
        let mut ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        let creation = &ops[0];

        assert!(matches!(
            ledger.mark_migrated(creation, None),
            Err(LedgerError::MissingTargetId { .. })
        ));
        ledger.mark_migrated(creation, Some(9001)).unwrap();

        let stored = ledger.get(creation.id).unwrap().unwrap();
        assert!(stored.migrated);
        assert_eq!(stored.target_entity_id, 9001);

        assert!(matches!(
            ledger.mark_migrated(creation, Some(9002)),
            Err(LedgerError::AlreadyMigrated { .. })
        ));
        assert_eq!(ledger.get(creation.id).unwrap().unwrap().target_entity_id, 9001);
    }

    #[test]
    fn test_mark_migrated_rejects_target_on_update_rows() {
        let mut ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        let update = ops.iter().find(|op| op.revision_index == 1).unwrap();

        assert!(matches!(
            ledger.mark_migrated(update, Some(5)),
            Err(LedgerError::UnexpectedTargetId { .. })
        ));
    }

    #[test]
    fn test_entity_map_is_projection_of_creation_rows() {
        let mut ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        ledger.mark_migrated(&ops[0], Some(1)).unwrap();
        ledger.mark_migrated(&ops[1], Some(2)).unwrap();
        ledger.mark_migrated(&ops[2], None).unwrap();

        let map = ledger.entity_map(Some("Legacy")).unwrap();
        let scanned: EntityMap = ledger
            .ops("Legacy")
            .unwrap()
            .into_iter()
            .filter(|op| op.migrated && op.is_creation())
            .map(|op| (op.source_entity_id, op.target_entity_id))
            .collect();

        assert_eq!(map, scanned);
        assert_eq!(map.get(101), Some(1));
        assert_eq!(map.get(102), Some(2));
        assert!(ledger.entity_map(Some("Other")).unwrap().is_empty());
        assert_eq!(ledger.entity_map(None).unwrap().len(), 2);
    }

    #[test]
    fn test_progress_counts() {
        let mut ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        ledger.mark_migrated(&ops[0], Some(1)).unwrap();

        let progress = ledger.progress("Legacy").unwrap();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.migrated, 1);
        assert_eq!(progress.pending_revisions, 2);
        assert_eq!(progress.pending_links, 1);
        assert_eq!(progress.percent_complete(), 25.0);
    }

    #[test]
    fn test_verify_shape_detects_orphan_revision() {
        let mut ledger = seeded();
        ledger.verify_shape("Legacy").unwrap();

        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        let update = ops.iter().find(|op| op.revision_index == 1).unwrap();
        ledger.mark_migrated(update, None).unwrap();

        assert!(matches!(
            ledger.verify_shape("Legacy"),
            Err(LedgerError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_write_entity_map() {
        let mut ledger = seeded();
        let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
        ledger.mark_migrated(&ops[0], Some(11)).unwrap();

        let mut out = Vec::new();
        let written = ledger.write_entity_map(&mut out).unwrap();

        assert_eq!(written, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "Source ID|Target ID\n101|11\n");
    }

    #[test]
    fn test_file_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(&[revision(101, 0, 1)]).unwrap();
            let ops = ledger.pending_ops("Legacy", &HashSet::new()).unwrap();
            ledger.mark_migrated(&ops[0], Some(77)).unwrap();
            ledger.checkpoint().unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.pending_ops("Legacy", &HashSet::new()).unwrap().is_empty());
        assert_eq!(ledger.entity_map(None).unwrap().get(101), Some(77));
        assert!(ledger.contains_entity("Legacy", 101).unwrap());
        assert!(!ledger.contains_entity("Legacy", 102).unwrap());
    }
}
