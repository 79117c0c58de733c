//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use wimigrate_core::replay::{
    ReplayConfig, DEFAULT_BACKOFF_BASE, DEFAULT_CHECKPOINT_EVERY, DEFAULT_MAX_RETRIES,
};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "wimigrate=info,wimigrate_core=info";

/// Work item history migration tool.
#[derive(Parser, Debug)]
#[command(name = "wimigrate")]
#[command(version, about = "Replay work item history from one tracker into another", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record every source revision and link as a pending ledger row.
    Seed(SeedArgs),
    /// Replay pending ledger rows into the target.
    Replay(ReplayArgs),
    /// Show ledger progress for a scope.
    Status(StatusArgs),
    /// Write the source-to-target id map.
    ExportMap(ExportMapArgs),
}

#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Ledger database file.
    #[arg(long)]
    pub ledger: PathBuf,

    /// Source collection snapshot.
    #[arg(long)]
    pub source: PathBuf,

    /// Ledger scope, normally the source project name.
    #[arg(long)]
    pub scope: String,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Ledger database file.
    #[arg(long)]
    pub ledger: PathBuf,

    /// Source collection snapshot.
    #[arg(long)]
    pub source: PathBuf,

    /// Target collection snapshot, updated in place.
    #[arg(long)]
    pub target: PathBuf,

    /// Type and field mapping file.
    #[arg(long)]
    pub mapping: PathBuf,

    /// Source project name (also the ledger scope).
    #[arg(long)]
    pub source_project: String,

    /// Target project name.
    #[arg(long)]
    pub target_project: String,

    /// Target node to place source areas and iterations under.
    #[arg(long)]
    pub node_root: Option<String>,

    /// Copy the source area and iteration trees before replaying.
    #[arg(long)]
    pub clone_nodes: bool,

    /// Put every entity on the target root (or --node-root) node.
    #[arg(long, conflicts_with = "clone_nodes")]
    pub collapse_nodes: bool,

    /// Record status changes in the history field.
    #[arg(long)]
    pub annotate_status_changes: bool,

    /// Link to unmigrated entities by their original id.
    #[arg(long)]
    pub legacy_links: bool,

    /// Operations between ledger checkpoints.
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY)]
    pub checkpoint_every: usize,

    /// Transient failures tolerated before aborting.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Backoff unit in seconds; the n-th retry waits n times this long.
    #[arg(long, default_value_t = DEFAULT_BACKOFF_BASE.as_secs())]
    pub backoff_secs: u64,

    /// Seed for attachment name suffixes.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the run report as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Ledger database file.
    #[arg(long)]
    pub ledger: PathBuf,

    /// Scope to report; every scope when omitted.
    #[arg(long)]
    pub scope: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportMapArgs {
    /// Ledger database file.
    #[arg(long)]
    pub ledger: PathBuf,

    /// Output file.
    #[arg(long)]
    pub out: PathBuf,
}

impl From<&ReplayArgs> for ReplayConfig {
    fn from(args: &ReplayArgs) -> Self {
        let mut config = ReplayConfig::new(&args.source_project, &args.target_project)
            .with_checkpoint_every(args.checkpoint_every)
            .with_max_retries(args.max_retries)
            .with_backoff_base(Duration::from_secs(args.backoff_secs))
            .with_collapsed_nodes(args.collapse_nodes)
            .with_status_annotations(args.annotate_status_changes)
            .with_legacy_links(args.legacy_links);
        if let Some(node_root) = &args.node_root {
            config = config.with_node_sub_root(node_root);
        }
        if let Some(seed) = args.seed {
            config = config.with_rng_seed(seed);
        }
        config
    }
}
