//! Subcommand implementations.

use std::fs::File;
use std::io::BufWriter;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use wimigrate_core::mapping::{clone_node_tree, MappingTable};
use wimigrate_core::model::NodeKind;
use wimigrate_core::replay::{ReplayConfig, Replayer, RunReport};
use wimigrate_core::store::MemoryStore;
use wimigrate_core::{seed_ledger, Ledger};

use crate::args::{ExportMapArgs, ReplayArgs, SeedArgs, StatusArgs};

pub async fn seed(args: &SeedArgs) -> anyhow::Result<()> {
    let source = MemoryStore::load(&args.source)
        .with_context(|| format!("loading source snapshot {}", args.source.display()))?;
    let mut ledger = Ledger::open(&args.ledger)?;

    let summary = seed_ledger(&source, &mut ledger, &args.scope).await?;
    println!(
        "seeded {} entities ({} revision rows, {} link rows), {} already present",
        summary.entities, summary.revision_rows, summary.link_rows, summary.skipped
    );
    Ok(())
}

/// Run a replay. Returns the report so the caller can pick the exit code.
pub async fn replay(args: &ReplayArgs) -> anyhow::Result<RunReport> {
    let config = ReplayConfig::from(args);
    let source = MemoryStore::load(&args.source)
        .with_context(|| format!("loading source snapshot {}", args.source.display()))?;
    // Every target write lands on disk before the ledger records it.
    let target = MemoryStore::open(&args.target)
        .with_context(|| format!("opening target snapshot {}", args.target.display()))?;
    let mapping = MappingTable::load(&args.mapping)?;
    let mut ledger = Ledger::open(&args.ledger)?;

    info!(
        source = %args.source.display(),
        target = %args.target.display(),
        types = mapping.len(),
        scope = config.scope(),
        "configuration loaded"
    );

    if args.clone_nodes {
        let migrated = ledger.entity_map(Some(config.scope()))?.len();
        for kind in [NodeKind::Area, NodeKind::Iteration] {
            clone_node_tree(&source, &target, kind, config.node_sub_root.as_deref(), migrated).await?;
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let report = Replayer::new(&mut ledger, &source, &target, &mapping, config)
        .with_shutdown(shutdown_rx)
        .run()
        .await?;

    if let Some(path) = &args.report {
        report.write_json(path)?;
        info!(path = %path.display(), "report written");
    }
    println!("{}", report.summary());
    Ok(report)
}

pub fn status(args: &StatusArgs) -> anyhow::Result<()> {
    let ledger = Ledger::open(&args.ledger)?;
    let scopes = match &args.scope {
        Some(scope) => vec![scope.clone()],
        None => ledger.scopes()?,
    };

    for scope in scopes {
        let progress = ledger.progress(&scope)?;
        println!(
            "{scope}: {}/{} migrated ({:.1}%), {} revisions and {} links pending",
            progress.migrated,
            progress.total,
            progress.percent_complete(),
            progress.pending_revisions,
            progress.pending_links
        );
    }
    Ok(())
}

pub fn export_map(args: &ExportMapArgs) -> anyhow::Result<()> {
    let ledger = Ledger::open(&args.ledger)?;
    let file = File::create(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    let written = ledger.write_entity_map(BufWriter::new(file))?;
    println!("wrote {written} entries to {}", args.out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use wimigrate_core::mapping::{FieldMapping, TypeMapping};
    use wimigrate_core::model::{FieldValue, SourceEntity, SourceRevision};
    use wimigrate_core::replay::RunOutcome;
    use wimigrate_core::store::{FieldDef, Snapshot, WorkItemTypeDef};

    fn write_fixtures(dir: &Path) {
        let source = MemoryStore::new(Snapshot::new("http://legacy", "Legacy"));
        source.insert_entity(SourceEntity {
            id: 7,
            entity_type: "Bug".to_string(),
            revisions: vec![SourceRevision::new(0, Utc.timestamp_opt(1_440_000_000, 0).unwrap())
                .with_field("System.Title", "Imported")],
            links: Vec::new(),
        });
        source.persist(dir.join("source.json")).unwrap();

        let target = MemoryStore::new(Snapshot::new("http://platform", "Platform"));
        target.define_type(
            "Bug",
            WorkItemTypeDef::new().with_field("System.Title", FieldDef::default().required()),
        );
        target.persist(dir.join("target.json")).unwrap();

        let mapping = MappingTable::new(vec![
            TypeMapping::new("Bug", "Bug").with_field(FieldMapping::new("System.Title", "System.Title"))
        ])
        .unwrap();
        std::fs::write(dir.join("mapping.json"), serde_json::to_string(&mapping).unwrap()).unwrap();
    }

    fn replay_args(dir: &Path) -> ReplayArgs {
        ReplayArgs {
            ledger: dir.join("ledger.db"),
            source: dir.join("source.json"),
            target: dir.join("target.json"),
            mapping: dir.join("mapping.json"),
            source_project: "Legacy".to_string(),
            target_project: "Platform".to_string(),
            node_root: None,
            clone_nodes: false,
            collapse_nodes: false,
            annotate_status_changes: false,
            legacy_links: false,
            checkpoint_every: 100,
            max_retries: 1,
            backoff_secs: 0,
            seed: Some(1),
            report: Some(dir.join("report.json")),
        }
    }

    async fn seed_fixtures(dir: &Path) {
        seed(&SeedArgs {
            ledger: dir.join("ledger.db"),
            source: dir.join("source.json"),
            scope: "Legacy".to_string(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_seed_replay_export() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        seed_fixtures(dir.path()).await;
        let args = replay_args(dir.path());
        let ledger = args.ledger.clone();

        let report = replay(&args).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.migrated, 1);

        let saved = MemoryStore::load(dir.path().join("target.json")).unwrap();
        assert_eq!(saved.entity_count(), 1);
        assert!(dir.path().join("report.json").exists());

        status(&StatusArgs {
            ledger: ledger.clone(),
            scope: None,
        })
        .unwrap();

        let out = dir.path().join("map.txt");
        export_map(&ExportMapArgs {
            ledger,
            out: out.clone(),
        })
        .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "Source ID|Target ID\n7|1\n");
    }

    #[tokio::test]
    async fn test_replay_resumes_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path());
        let source = MemoryStore::load(dir.path().join("source.json")).unwrap();
        let mut entity = source.entity(7).unwrap();
        entity.revisions.push(
            SourceRevision::new(1, Utc.timestamp_opt(1_440_000_060, 0).unwrap())
                .with_field("System.Title", "Renamed"),
        );
        source.insert_entity(entity);
        source.persist(dir.path().join("source.json")).unwrap();
        seed_fixtures(dir.path()).await;
        let args = replay_args(dir.path());

        // The connection drops after the creation and the process exits
        // without any further write to the target snapshot.
        {
            let source = MemoryStore::load(&args.source).unwrap();
            let target = MemoryStore::open(&args.target).unwrap();
            target.fail_after_saves(1);
            let mapping = MappingTable::load(&args.mapping).unwrap();
            let mut ledger = Ledger::open(&args.ledger).unwrap();

            let report = Replayer::new(&mut ledger, &source, &target, &mapping, ReplayConfig::from(&args))
                .run()
                .await
                .unwrap();
            assert_eq!(report.outcome, RunOutcome::RetriesExhausted);
            assert_eq!(report.migrated, 1);
        }

        let report = replay(&args).await.unwrap();
        assert!(report.is_complete());
        assert!(report.invalid.is_empty());
        assert_eq!(report.migrated, 1);

        let saved = MemoryStore::load(&args.target).unwrap();
        assert_eq!(saved.entity_count(), 1);
        let created = saved.entity(1).unwrap();
        assert_eq!(created.revisions.len(), 2);
        assert_eq!(created.revisions[1].field("System.Title"), Some(&FieldValue::from("Renamed")));
    }
}
