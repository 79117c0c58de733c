//! Source-side entity history: revisions, attachments and link events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::{EntityId, FieldValue};

/// Reference to a file attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub length: u64,
    /// Attachment comment.
    #[serde(default)]
    pub comment: String,
    /// Location the content can be downloaded from.
    #[serde(default)]
    pub uri: String,
}

impl AttachmentRef {
    /// Create an attachment reference.
    pub fn new(name: impl Into<String>, length: u64, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length,
            comment: comment.into(),
            uri: String::new(),
        }
    }

    /// Set the download location.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Heuristic identity: byte length, file name and comment.
    ///
    /// No content hash is available from the tracker, so two distinct files
    /// sharing all three collide.
    pub fn same_identity(&self, other: &AttachmentRef) -> bool {
        self.length == other.length && self.name == other.name && self.comment == other.comment
    }
}

/// A historical link event between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Name of the link type end (e.g. "Child", "Related").
    pub link_type: String,
    /// Entity the link originates from.
    pub source_id: EntityId,
    /// Entity the link points to.
    pub target_id: EntityId,
    /// When the link was added.
    pub added_at: DateTime<Utc>,
    /// When the link was removed, if it was.
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
}

impl LinkRecord {
    /// Check whether the link still exists in the source store.
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other_end(&self, id: EntityId) -> Option<EntityId> {
        if self.source_id == id {
            Some(self.target_id)
        } else if self.target_id == id {
            Some(self.source_id)
        } else {
            None
        }
    }
}

/// Snapshot of an entity's fields at one point in its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRevision {
    /// Position within the entity's change sequence (0 = creation).
    pub index: usize,
    /// When the change was made.
    pub changed_at: DateTime<Utc>,
    /// Field values keyed by field reference name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Attachment snapshot at this revision.
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl SourceRevision {
    /// Create an empty revision.
    pub fn new(index: usize, changed_at: DateTime<Utc>) -> Self {
        Self {
            index,
            changed_at,
            fields: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }

    /// Add a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Add an attachment.
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Look up a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Names of the fields whose value differs from `previous`.
    ///
    /// For the creation revision every non-null field counts as changed.
    pub fn changed_fields(&self, previous: Option<&SourceRevision>) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(name, value)| match previous {
                Some(prev) => prev.fields.get(name.as_str()) != Some(*value),
                None => !value.is_null(),
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// An entity as fetched from the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    /// Source store id.
    pub id: EntityId,
    /// Work item type name.
    pub entity_type: String,
    /// Revisions in change order.
    #[serde(default)]
    pub revisions: Vec<SourceRevision>,
    /// Full link history, including removed links.
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

impl SourceEntity {
    /// Get a revision by index.
    pub fn revision(&self, index: usize) -> Option<&SourceRevision> {
        self.revisions.get(index)
    }

    /// The active link from this entity to `other`, if any.
    pub fn active_link_to(&self, other: EntityId) -> Option<&LinkRecord> {
        self.links
            .iter()
            .find(|link| link.is_active() && link.other_end(self.id) == Some(other))
    }
}
