//! Replay run configuration.

use std::time::Duration;

/// Default number of operations between ledger checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 100;
/// Default number of transient failures tolerated before a run aborts.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Default backoff unit; the n-th retry waits n times this long.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(60);

/// Configuration for a replay run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Source project name; also the ledger scope replayed.
    pub source_project: String,
    /// Target project name.
    pub target_project: String,
    checkpoint_every: usize,
    /// Transient failures tolerated before aborting.
    pub max_retries: u32,
    /// Backoff unit between retries.
    pub backoff_base: Duration,
    /// Target node the source areas and iterations live under.
    pub node_sub_root: Option<String>,
    /// Map every source node onto the target root (or sub-root).
    pub collapse_nodes: bool,
    /// Record status changes in the history field.
    pub annotate_status_changes: bool,
    /// Link to unmigrated entities by their original id.
    pub legacy_links: bool,
    /// Seed for attachment name suffixes; random when unset.
    pub rng_seed: Option<u64>,
}

impl ReplayConfig {
    /// Create a configuration with default settings.
    pub fn new(source_project: impl Into<String>, target_project: impl Into<String>) -> Self {
        Self {
            source_project: source_project.into(),
            target_project: target_project.into(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            node_sub_root: None,
            collapse_nodes: false,
            annotate_status_changes: false,
            legacy_links: false,
            rng_seed: None,
        }
    }

    /// Ledger scope replayed by this run.
    pub fn scope(&self) -> &str {
        &self.source_project
    }

    /// Operations between ledger checkpoints; never zero.
    pub fn checkpoint_every(&self) -> usize {
        self.checkpoint_every
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_every(mut self, ops: usize) -> Self {
        self.checkpoint_every = ops.max(1);
        self
    }

    /// Set the retry cap.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff unit.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Place migrated nodes under a sub-root.
    pub fn with_node_sub_root(mut self, sub_root: impl Into<String>) -> Self {
        self.node_sub_root = Some(sub_root.into());
        self
    }

    /// Map every node onto the target root.
    pub fn with_collapsed_nodes(mut self, collapse: bool) -> Self {
        self.collapse_nodes = collapse;
        self
    }

    /// Enable history annotation of status changes.
    pub fn with_status_annotations(mut self, enabled: bool) -> Self {
        self.annotate_status_changes = enabled;
        self
    }

    /// Enable legacy links.
    pub fn with_legacy_links(mut self, enabled: bool) -> Self {
        self.legacy_links = enabled;
        self
    }

    /// Fix the attachment suffix seed.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}
