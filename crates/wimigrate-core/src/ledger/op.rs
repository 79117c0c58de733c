//! Ledger row types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EntityId;

/// Separator used for the changed-field fingerprint column.
pub const FINGERPRINT_SEPARATOR: &str = "|";

/// Kind of replay work a ledger row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// A field revision of an entity.
    Revision,
    /// A link event between two entities.
    Link,
}

impl OpKind {
    /// Column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Revision => "revision",
            OpKind::Link => "link",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OpKind {
    type Err = ParseOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revision" => Ok(OpKind::Revision),
            "link" => Ok(OpKind::Link),
            other => Err(ParseOpError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors decoding the kind/fingerprint columns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseOpError {
    /// The kind column holds an unknown value.
    #[error("unknown op kind '{0}'")]
    UnknownKind(String),

    /// A link row's fingerprint is not an entity id.
    #[error("link fingerprint '{0}' is not an entity id")]
    InvalidLinkEnd(String),
}

/// Kind-specific payload of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpDetail {
    /// Fields that differ from the prior revision.
    Revision {
        /// Changed field reference names.
        changed_fields: Vec<String>,
    },
    /// The link's other endpoint (source store id).
    Link {
        /// Other endpoint id.
        other_end: EntityId,
    },
}

impl OpDetail {
    /// Row kind for this payload.
    pub fn kind(&self) -> OpKind {
        match self {
            OpDetail::Revision { .. } => OpKind::Revision,
            OpDetail::Link { .. } => OpKind::Link,
        }
    }

    /// Encode the payload into the fingerprint column.
    pub fn fingerprint(&self) -> String {
        match self {
            OpDetail::Revision { changed_fields } => {
                changed_fields.join(FINGERPRINT_SEPARATOR)
            }
            OpDetail::Link { other_end } => other_end.to_string(),
        }
    }

    /// Decode the payload from the kind and fingerprint columns.
    pub fn parse(kind: OpKind, fingerprint: &str) -> Result<Self, ParseOpError> {
        match kind {
            OpKind::Revision => Ok(OpDetail::Revision {
                changed_fields: fingerprint
                    .split(FINGERPRINT_SEPARATOR)
                    .filter(|field| !field.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            OpKind::Link => fingerprint
                .trim()
                .parse()
                .map(|other_end| OpDetail::Link { other_end })
                .map_err(|_| ParseOpError::InvalidLinkEnd(fingerprint.to_string())),
        }
    }
}

/// One atomic unit of replay work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionOp {
    /// Ledger surrogate key (insertion order).
    pub id: i64,
    /// Entity id in the source store.
    pub source_entity_id: EntityId,
    /// Entity id in the target store; 0 until the creation row migrates.
    pub target_entity_id: EntityId,
    /// Position in the entity's change sequence (0 = creation).
    pub revision_index: u32,
    /// Changes known for the entity at ledger-write time (progress display only).
    pub revision_count: u32,
    /// When the change happened; primary ordering key.
    pub changed_at: DateTime<Utc>,
    /// Whether the row has been replayed.
    pub migrated: bool,
    /// Project/namespace the row belongs to.
    pub scope: String,
    /// Kind-specific payload.
    pub detail: OpDetail,
}

impl RevisionOp {
    /// Row kind.
    pub fn kind(&self) -> OpKind {
        self.detail.kind()
    }

    /// Check whether replaying this row creates the target entity.
    pub fn is_creation(&self) -> bool {
        self.revision_index == 0 && self.kind() == OpKind::Revision
    }

    /// Other endpoint for link rows.
    pub fn link_other_end(&self) -> Option<EntityId> {
        match self.detail {
            OpDetail::Link { other_end } => Some(other_end),
            OpDetail::Revision { .. } => None,
        }
    }
}

/// A row to be appended by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevisionOp {
    /// Entity id in the source store.
    pub source_entity_id: EntityId,
    /// Position in the entity's change sequence.
    pub revision_index: u32,
    /// Changes known for the entity.
    pub revision_count: u32,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
    /// Project/namespace.
    pub scope: String,
    /// Kind-specific payload.
    pub detail: OpDetail,
}

/// Source id → target id projection of the ledger.
///
/// Only ever built from migrated creation rows; the scheduler keeps a copy
/// per run and extends it as creation rows migrate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMap {
    entries: BTreeMap<EntityId, EntityId>,
}

impl EntityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target id for a source id.
    pub fn get(&self, source_id: EntityId) -> Option<EntityId> {
        self.entries.get(&source_id).copied()
    }

    /// Check whether a source entity has been migrated.
    pub fn contains(&self, source_id: EntityId) -> bool {
        self.entries.contains_key(&source_id)
    }

    /// Record a migrated entity.
    pub fn insert(&mut self, source_id: EntityId, target_id: EntityId) {
        self.entries.insert(source_id, target_id);
    }

    /// Number of mapped entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (source, target) pairs in source id order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.entries.iter().map(|(s, t)| (*s, *t))
    }
}

impl FromIterator<(EntityId, EntityId)> for EntityMap {
    fn from_iter<I: IntoIterator<Item = (EntityId, EntityId)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
