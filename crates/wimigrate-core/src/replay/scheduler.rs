//! Replay scheduler.
//!
//! Drains pending ledger rows in timeline order against the target store:
//! - Revision rows go through the field transformation engine
//! - Link rows go through link resolution
//! - Each successful write is immediately recorded in the ledger
//! - Invalid entities are reported and their later rows skipped
//! - Transient faults restart the drain from the ledger after a backoff

use std::collections::HashSet;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::config::ReplayConfig;
use super::error::ReplayError;
use super::report::{DeferredLink, InvalidEntity, RetryRecord, RunOutcome, RunReport};
use super::state::ReplayState;
use crate::ledger::{EntityMap, Ledger, LedgerError, OpDetail, RevisionOp};
use crate::link::{resolve_link, LinkAction};
use crate::mapping::well_known::CHANGED_DATE;
use crate::mapping::{MappingTable, NodeIdentityMap};
use crate::model::{EntityId, FieldValue, NodeKind};
use crate::store::{SourceStore, StoreError, TargetStore};
use crate::transform::{transform_revision, TransformContext};

/// Outcome of applying a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Applied {
    /// The target was written and the row marked migrated.
    Migrated,
    /// The row was marked migrated without a target write.
    Skipped,
    /// The row stays pending for a later pass.
    Deferred,
    /// The row is semantically invalid; its entity is abandoned for this run.
    Invalid(String),
}

#[derive(Debug)]
enum ApplyError {
    Store(StoreError),
    Ledger(LedgerError),
    Corrupt(String),
}

impl From<StoreError> for ApplyError {
    fn from(err: StoreError) -> Self {
        ApplyError::Store(err)
    }
}

impl From<LedgerError> for ApplyError {
    fn from(err: LedgerError) -> Self {
        ApplyError::Ledger(err)
    }
}

/// How one attempt over the ledger ended.
enum DrainOutcome {
    Finished,
    Interrupted,
    Corrupt(String),
    Transient(StoreError),
}

struct NodeMaps {
    area: NodeIdentityMap,
    iteration: NodeIdentityMap,
}

/// Replays one ledger scope into a target store.
pub struct Replayer<'a, S: ?Sized, T: ?Sized> {
    ledger: &'a mut Ledger,
    source: &'a S,
    target: &'a T,
    mapping: &'a MappingTable,
    config: ReplayConfig,
    shutdown: Option<watch::Receiver<bool>>,
    state: ReplayState,
    rng: StdRng,
}

impl<'a, S, T> Replayer<'a, S, T>
where
    S: SourceStore + ?Sized,
    T: TargetStore + ?Sized,
{
    /// Create a replayer.
    pub fn new(
        ledger: &'a mut Ledger,
        source: &'a S,
        target: &'a T,
        mapping: &'a MappingTable,
        config: ReplayConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            ledger,
            source,
            target,
            mapping,
            config,
            shutdown: None,
            state: ReplayState::Idle,
            rng,
        }
    }

    /// Stop at the next operation boundary once the receiver reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReplayState {
        self.state
    }

    fn transition(&mut self, next: ReplayState) {
        debug!(from = %self.state, to = %next, "replay state change");
        if next.is_terminal() {
            info!(scope = self.config.scope(), state = %next, "replay finished");
        }
        self.state = next;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run until the scope is drained, the retry cap is hit, or shutdown.
    ///
    /// Returns `Err` only for startup failures (configuration, mapping or
    /// node-map loading) and local ledger I/O errors. Everything else ends up
    /// in the report, and the ledger is left resumable in every case.
    pub async fn run(&mut self) -> Result<RunReport, ReplayError> {
        let started = Instant::now();
        let scope = self.config.scope().to_string();
        let mut report = RunReport::new(scope.clone());

        self.check_preconditions()?;
        self.transition(ReplayState::Loading);

        if let Err(err) = self.ledger.verify_shape(&scope) {
            return match err {
                LedgerError::Corrupted { message } => {
                    error!(scope = %scope, %message, "ledger failed shape check");
                    report.outcome = RunOutcome::CorruptLedger { detail: message };
                    self.transition(ReplayState::Aborted);
                    report.elapsed_secs = started.elapsed().as_secs_f64();
                    Ok(report)
                }
                other => Err(other.into()),
            };
        }

        let nodes = self.load_node_maps().await?;
        info!(
            scope = %scope,
            area_nodes = nodes.area.len(),
            iteration_nodes = nodes.iteration.len(),
            types = self.mapping.len(),
            "replay loaded"
        );

        let mut failed: HashSet<EntityId> = HashSet::new();
        loop {
            match self.drain(&nodes, &mut failed, &mut report).await? {
                DrainOutcome::Finished => {
                    report.outcome = RunOutcome::Completed;
                    self.transition(ReplayState::Done);
                    break;
                }
                DrainOutcome::Interrupted => {
                    warn!(scope = %scope, "shutdown requested; stopping at operation boundary");
                    report.outcome = RunOutcome::Interrupted;
                    self.transition(ReplayState::Aborted);
                    break;
                }
                DrainOutcome::Corrupt(detail) => {
                    error!(scope = %scope, %detail, "ledger corruption detected; aborting");
                    report.outcome = RunOutcome::CorruptLedger { detail };
                    self.transition(ReplayState::Aborted);
                    break;
                }
                DrainOutcome::Transient(err) => {
                    report.retries += 1;
                    let attempt = report.retries;
                    error!(scope = %scope, attempt, error = %err, "transient store fault");
                    report.exceptions.push(RetryRecord {
                        attempt,
                        error: err.to_string(),
                    });

                    if attempt >= self.config.max_retries {
                        report.outcome = RunOutcome::RetriesExhausted;
                        self.transition(ReplayState::Aborted);
                        break;
                    }

                    self.transition(ReplayState::Retrying { attempt });
                    let delay = self.config.backoff_for(attempt);
                    info!(attempt, delay_secs = delay.as_secs(), "backing off before restarting drain");
                    if self.backoff(delay).await {
                        report.outcome = RunOutcome::Interrupted;
                        self.transition(ReplayState::Aborted);
                        break;
                    }
                }
            }
        }

        self.ledger.checkpoint()?;
        report.deferred = self.deferred_links(&failed)?;
        if !report.deferred.is_empty() {
            warn!(scope = %scope, count = report.deferred.len(), "links left pending; endpoints never migrated");
        }
        report.elapsed_secs = started.elapsed().as_secs_f64();
        info!(scope = %scope, "{}", report.summary());
        Ok(report)
    }

    fn check_preconditions(&self) -> Result<(), ReplayError> {
        if self.config.legacy_links && self.source.collection() != self.target.collection() {
            return Err(ReplayError::Config(format!(
                "legacy links need source and target in the same collection ({} vs {})",
                self.source.collection(),
                self.target.collection()
            )));
        }
        Ok(())
    }

    async fn load_node_maps(&self) -> Result<NodeMaps, ReplayError> {
        Ok(NodeMaps {
            area: self.load_node_map(NodeKind::Area).await?,
            iteration: self.load_node_map(NodeKind::Iteration).await?,
        })
    }

    async fn load_node_map(&self, kind: NodeKind) -> Result<NodeIdentityMap, ReplayError> {
        let sub_root = self.config.node_sub_root.as_deref();
        let target_tree = self.target.fetch_node_tree(kind).await?;
        if self.config.collapse_nodes {
            return Ok(NodeIdentityMap::collapsed(kind, &target_tree, sub_root)?);
        }
        let source_tree = self.source.fetch_node_tree(kind).await?;
        Ok(NodeIdentityMap::build(kind, &source_tree, &target_tree, sub_root)?)
    }

    /// Sleep before a retry. Returns `true` if shutdown arrived meanwhile.
    async fn backoff(&mut self, delay: std::time::Duration) -> bool {
        match self.shutdown.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    Ok(()) = rx.changed() => *rx.borrow(),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        }
    }

    /// One attempt: passes over the pending rows until nothing more converges.
    async fn drain(
        &mut self,
        nodes: &NodeMaps,
        failed: &mut HashSet<EntityId>,
        report: &mut RunReport,
    ) -> Result<DrainOutcome, ReplayError> {
        let scope = self.config.scope().to_string();
        let mut pass = 0;

        loop {
            pass += 1;
            report.passes += 1;
            self.transition(ReplayState::Draining { pass });

            // Recomputed from the ledger on every pass; extended locally as creations migrate.
            let mut entity_map = self.ledger.entity_map(None)?;
            let mapped_at_start = entity_map.len();
            let ops = self.ledger.pending_ops(&scope, failed)?;
            let total = ops.len();
            let mut deferred = 0usize;
            info!(scope = %scope, pass, pending = total, mapped = mapped_at_start, "draining");

            for (position, op) in ops.iter().enumerate() {
                if self.shutdown_requested() {
                    return Ok(DrainOutcome::Interrupted);
                }
                if failed.contains(&op.source_entity_id) {
                    continue;
                }

                report.processed += 1;
                match self.apply(op, &mut entity_map, nodes).await {
                    Ok(Applied::Migrated) => report.migrated += 1,
                    Ok(Applied::Skipped) => {
                        report.migrated += 1;
                        report.skipped_links += 1;
                    }
                    Ok(Applied::Deferred) => deferred += 1,
                    Ok(Applied::Invalid(error)) => {
                        warn!(
                            entity = op.source_entity_id,
                            revision = op.revision_index,
                            %error,
                            "entity abandoned for this run"
                        );
                        failed.insert(op.source_entity_id);
                        report.invalid.push(InvalidEntity {
                            source_entity_id: op.source_entity_id,
                            op_id: op.id,
                            revision_index: op.revision_index,
                            error,
                        });
                    }
                    Err(ApplyError::Store(err)) => return Ok(DrainOutcome::Transient(err)),
                    Err(ApplyError::Corrupt(detail)) => return Ok(DrainOutcome::Corrupt(detail)),
                    Err(ApplyError::Ledger(err)) => return Err(err.into()),
                }

                let done = position + 1;
                if done % self.config.checkpoint_every() == 0 {
                    self.ledger.checkpoint()?;
                    info!(
                        scope = %scope,
                        processed = done,
                        total,
                        percent = %format!("{:.1}", done as f64 * 100.0 / total as f64),
                        "checkpoint"
                    );
                }
            }

            self.ledger.checkpoint()?;
            if deferred > 0 && entity_map.len() > mapped_at_start {
                info!(scope = %scope, deferred, "entity map grew; retrying deferred links");
                continue;
            }
            return Ok(DrainOutcome::Finished);
        }
    }

    /// Apply one row. Non-transient store failures become invalid rows.
    async fn apply(
        &mut self,
        op: &RevisionOp,
        entity_map: &mut EntityMap,
        nodes: &NodeMaps,
    ) -> Result<Applied, ApplyError> {
        debug!(op = op.id, entity = op.source_entity_id, kind = %op.kind(), index = op.revision_index, "apply");

        let result = match &op.detail {
            OpDetail::Revision { .. } => self.apply_revision(op, entity_map, nodes).await,
            OpDetail::Link { other_end } => self.apply_link(op, *other_end, entity_map).await,
        };
        match result {
            Err(ApplyError::Store(err)) if !err.is_transient() => Ok(Applied::Invalid(err.to_string())),
            other => other,
        }
    }

    async fn apply_revision(
        &mut self,
        op: &RevisionOp,
        entity_map: &mut EntityMap,
        nodes: &NodeMaps,
    ) -> Result<Applied, ApplyError> {
        let source_id = op.source_entity_id;
        let entity = self.source.fetch_entity(source_id).await?;
        let index = op.revision_index as usize;
        let Some(revision) = entity.revision(index) else {
            return Ok(Applied::Invalid(format!("revision {index} not found in source")));
        };
        let previous = index.checked_sub(1).and_then(|i| entity.revision(i));

        let Some(type_mapping) = self.mapping.type_mapping(&entity.entity_type) else {
            return Ok(Applied::Invalid(format!(
                "work item type '{}' not in mapping",
                entity.entity_type
            )));
        };

        let is_new = op.is_creation();
        let mut draft = if is_new {
            self.target.create_entity(&type_mapping.target_type).await?
        } else {
            match entity_map.get(source_id) {
                Some(target_id) => self.target.open_entity(target_id).await?,
                None => {
                    return Err(ApplyError::Corrupt(format!(
                        "row {}: entity {} revision {} pending but its creation was never migrated",
                        op.id, source_id, op.revision_index
                    )))
                }
            }
        };

        let ctx = TransformContext {
            type_mapping,
            area_nodes: &nodes.area,
            iteration_nodes: &nodes.iteration,
            source_project: &self.config.source_project,
            target_project: &self.config.target_project,
            node_sub_root: self.config.node_sub_root.as_deref(),
            annotate_status_changes: self.config.annotate_status_changes,
        };
        let output = transform_revision(&ctx, revision, previous, &draft, is_new, &mut self.rng);
        if !output.is_valid() {
            let errors: Vec<String> = output.errors.iter().map(ToString::to_string).collect();
            return Ok(Applied::Invalid(errors.join("; ")));
        }
        if let Err(err) = output.apply_fields(&mut draft) {
            return Ok(Applied::Invalid(err.to_string()));
        }

        for attachment in &output.attachments.remove {
            draft.remove_attachment(attachment);
        }
        for upload in &output.attachments.add {
            let content = self.source.fetch_attachment(&upload.source).await?;
            draft.add_attachment(upload.target_ref(), content);
        }

        if let Some(field) = draft.field(CHANGED_DATE) {
            if let (FieldValue::DateTime(new), FieldValue::DateTime(old)) = (&field.value, &field.original) {
                if new < old {
                    warn!(entity = source_id, revision = index, %new, %old, "changed date moves backwards");
                }
            }
        }

        let errors = self.target.validate(&draft).await?;
        if !errors.is_empty() {
            let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Ok(Applied::Invalid(errors.join("; ")));
        }

        let target_id = self.target.save(draft).await?;
        if is_new {
            self.ledger.mark_migrated(op, Some(target_id))?;
            entity_map.insert(source_id, target_id);
            debug!(entity = source_id, target = target_id, "entity created");
        } else {
            self.ledger.mark_migrated(op, None)?;
        }
        Ok(Applied::Migrated)
    }

    async fn apply_link(
        &mut self,
        op: &RevisionOp,
        other_end: EntityId,
        entity_map: &EntityMap,
    ) -> Result<Applied, ApplyError> {
        let own = op.source_entity_id;
        let entity = self.source.fetch_entity(own).await?;
        let Some(link) = entity.active_link_to(other_end) else {
            warn!(entity = own, other = other_end, "link no longer exists in source; nothing to replay");
            self.ledger.mark_migrated(op, None)?;
            return Ok(Applied::Skipped);
        };

        let action = resolve_link(own, link, entity_map, self.target, self.config.legacy_links).await?;
        let completes = action.completes_row();
        let applied = match action {
            LinkAction::CreateLink(new_link) | LinkAction::CreateLegacyLink(new_link) => {
                let Some(holder) = entity_map.get(own) else {
                    return Ok(Applied::Deferred);
                };
                self.target.create_link(holder, new_link).await?;
                Applied::Migrated
            }
            LinkAction::SkipExisting => Applied::Skipped,
            LinkAction::Defer => {
                debug!(entity = own, other = other_end, "link deferred");
                Applied::Deferred
            }
        };
        if completes {
            self.ledger.mark_migrated(op, None)?;
        }
        Ok(applied)
    }

    fn deferred_links(&self, failed: &HashSet<EntityId>) -> Result<Vec<DeferredLink>, ReplayError> {
        Ok(self
            .ledger
            .pending_ops(self.config.scope(), failed)?
            .into_iter()
            .filter_map(|op| {
                op.link_other_end().map(|other_end| DeferredLink {
                    op_id: op.id,
                    source_entity_id: op.source_entity_id,
                    other_end,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::seed_ledger;
    use crate::mapping::{FieldMapping, TypeMapping};
    use crate::model::{SourceEntity, SourceRevision};
    use crate::store::{FieldDef, MemoryStore, Snapshot, WorkItemTypeDef};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_440_000_000 + secs, 0).unwrap()
    }

    fn bug(id: EntityId, entity_type: &str, start: i64) -> SourceEntity {
        SourceEntity {
            id,
            entity_type: entity_type.to_string(),
            revisions: vec![
                SourceRevision::new(0, ts(start))
                    .with_field("System.Title", "Crash")
                    .with_field("System.State", "New")
                    .with_field("System.ChangedDate", ts(start)),
                SourceRevision::new(1, ts(start + 30))
                    .with_field("System.Title", "Crash")
                    .with_field("System.State", "Active")
                    .with_field("System.ChangedDate", ts(start + 30)),
            ],
            links: Vec::new(),
        }
    }

    fn source() -> MemoryStore {
        let store = MemoryStore::new(Snapshot::new("http://legacy", "Legacy"));
        store.insert_entity(bug(101, "Bug", 0));
        store
    }

    fn target() -> MemoryStore {
        let store = MemoryStore::new(Snapshot::new("http://platform", "Platform"));
        store.define_type(
            "Bug",
            WorkItemTypeDef::new()
                .with_field("System.Title", FieldDef::default().required())
                .with_field("System.State", FieldDef::default().with_allowed_values(["New", "Active"]))
                .with_field("System.ChangedDate", FieldDef::default()),
        );
        store
    }

    fn mapping() -> MappingTable {
        MappingTable::new(vec![TypeMapping::new("Bug", "Bug")
            .with_field(FieldMapping::new("System.Title", "System.Title"))
            .with_field(
                FieldMapping::new("System.State", "System.State")
                    .with_value("New", "New")
                    .with_value("Active", "Active"),
            )
            .with_field(FieldMapping::new("System.ChangedDate", "System.ChangedDate"))])
        .unwrap()
    }

    fn config() -> ReplayConfig {
        ReplayConfig::new("Legacy", "Platform")
            .with_backoff_base(Duration::ZERO)
            .with_rng_seed(7)
    }

    async fn seeded(source: &MemoryStore) -> Ledger {
        let mut ledger = Ledger::open_in_memory().unwrap();
        seed_ledger(source, &mut ledger, "Legacy").await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_replay_creates_then_updates() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;

        let mut replayer = Replayer::new(&mut ledger, &source, &target, &mapping, config());
        let report = replayer.run().await.unwrap();
        assert_eq!(replayer.state(), ReplayState::Done);

        assert!(report.is_complete());
        assert_eq!(report.migrated, 2);
        assert_eq!(target.save_count(), 2);
        let created = target.entity(1).unwrap();
        assert_eq!(created.revisions.len(), 2);
        assert_eq!(created.revisions[1].field("System.State"), Some(&FieldValue::from("Active")));
        assert_eq!(ledger.entity_map(None).unwrap().get(101), Some(1));
        assert_eq!(ledger.progress("Legacy").unwrap().migrated, 2);
    }

    #[tokio::test]
    async fn test_transient_fault_restarts_drain() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;
        target.fail_next_saves(1);

        let report = Replayer::new(&mut ledger, &source, &target, &mapping, config())
            .run()
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.retries, 1);
        assert_eq!(report.exceptions[0].attempt, 1);
        assert_eq!(target.entity_count(), 1);
        assert_eq!(target.save_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_cap_aborts() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;
        target.fail_after_saves(0);

        let mut replayer = Replayer::new(&mut ledger, &source, &target, &mapping, config().with_max_retries(2));
        let report = replayer.run().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::RetriesExhausted);
        assert_eq!(report.retries, 2);
        assert_eq!(replayer.state(), ReplayState::Aborted);
        assert!(replayer.state().is_terminal());
        assert_eq!(ledger.progress("Legacy").unwrap().migrated, 0);
    }

    #[tokio::test]
    async fn test_unmapped_type_is_reported() {
        let (source, target, mapping) = (source(), target(), mapping());
        source.insert_entity(bug(102, "Epic", 5));
        let mut ledger = seeded(&source).await;

        let report = Replayer::new(&mut ledger, &source, &target, &mapping, config())
            .run()
            .await
            .unwrap();

        assert!(report.is_complete());
        assert!(report.is_invalid(102));
        assert!(report.invalid[0].error.contains("'Epic' not in mapping"));
        assert_eq!(report.migrated, 2);
        assert_eq!(ledger.progress("Legacy").unwrap().pending_revisions, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_at_boundary() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = Replayer::new(&mut ledger, &source, &target, &mapping, config())
            .with_shutdown(rx)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert_eq!(report.processed, 0);
        assert_eq!(target.save_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_aborts_before_replay() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;
        let update = ledger
            .ops("Legacy")
            .unwrap()
            .into_iter()
            .find(|op| op.revision_index == 1)
            .unwrap();
        ledger.mark_migrated(&update, None).unwrap();

        let report = Replayer::new(&mut ledger, &source, &target, &mapping, config())
            .run()
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::CorruptLedger { .. }));
        assert_eq!(target.save_count(), 0);
    }

    #[tokio::test]
    async fn test_legacy_links_need_same_collection() {
        let (source, target, mapping) = (source(), target(), mapping());
        let mut ledger = seeded(&source).await;

        let result = Replayer::new(&mut ledger, &source, &target, &mapping, config().with_legacy_links(true))
            .run()
            .await;

        assert!(matches!(result, Err(ReplayError::Config(_))));
    }
}
