//! Mapping error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::NodeKind;
use crate::store::StoreError;

/// Errors loading mapping tables or building node maps.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The mapping file could not be read.
    #[error("failed to read mapping file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The mapping document is malformed.
    #[error("invalid mapping document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A source type is mapped more than once.
    #[error("work item type '{0}' is mapped more than once")]
    DuplicateType(String),

    /// The configured sub-root node does not exist in the target tree.
    #[error("{kind} sub-root '{name}' not found in target project")]
    SubRootNotFound {
        /// Tree the node was looked up in.
        kind: NodeKind,
        /// Node name.
        name: String,
    },

    /// Cloning nodes without a sub-root would disturb already-migrated entities.
    #[error("target project already holds {count} migrated entities; cloning nodes needs a sub-root")]
    NodesInUse {
        /// Migrated entity count.
        count: usize,
    },

    /// A store call failed while reading or creating nodes.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
