//! wimigrate core - revision-replay engine for work item migrations.
//!
//! Source history is recorded in a durable [`ledger`], one row per revision
//! and per link, and replayed into a target tracker in timeline order. The
//! ledger is the only progress record, so an interrupted run resumes where it
//! stopped.

pub mod discovery;
pub mod error;
pub mod ledger;
pub mod link;
pub mod mapping;
pub mod model;
pub mod replay;
pub mod store;
pub mod transform;

pub use discovery::{seed_ledger, SeedError, SeedSummary};
pub use error::{Error, Result};
pub use ledger::{EntityMap, Ledger, LedgerError, LedgerProgress, OpDetail, OpKind, RevisionOp};
pub use link::{resolve_link, LinkAction};
pub use mapping::{clone_node_tree, FieldMapping, MappingError, MappingTable, NodeIdentityMap, TypeMapping};
pub use model::{EntityDraft, EntityId, FieldValue, Node, NodeKind, SourceEntity, SourceRevision};
pub use replay::{ReplayConfig, ReplayError, ReplayState, Replayer, RunOutcome, RunReport};
pub use store::{MemoryStore, Snapshot, SourceStore, StoreError, TargetStore};
pub use transform::{transform_revision, TransformContext, TransformOutput, UnmappedValueError};
