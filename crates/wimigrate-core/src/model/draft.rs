//! Target-side entity drafts.
//!
//! A draft is a local, mutable copy of a target entity. Field assignments,
//! attachment changes and new links accumulate on the draft and are written
//! to the target store in a single save.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::AttachmentRef;
use super::value::{EntityId, FieldValue};

/// Errors raised when mutating a draft.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    /// The field does not exist on the target work item type.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The field cannot be edited in the entity's current state.
    #[error("field is read-only: {0}")]
    ReadOnly(String),
}

/// Field-level validation error reported by the target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field reference name.
    pub field: String,
    /// Validation status (e.g. "InvalidEmpty", "InvalidListValue").
    pub status: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(field: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            status: status.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.status)
    }
}

/// A field on a draft.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftField {
    /// Current (possibly modified) value.
    pub value: FieldValue,
    /// Value as loaded from the store.
    pub original: FieldValue,
    /// Whether the field accepts writes in the entity's current state.
    pub editable: bool,
}

impl DraftField {
    /// Create an unmodified field.
    pub fn new(value: FieldValue, editable: bool) -> Self {
        Self {
            original: value.clone(),
            value,
            editable,
        }
    }

    /// Check whether the value differs from the loaded one.
    pub fn is_dirty(&self) -> bool {
        self.value != self.original
    }
}

/// An attachment on a draft. `content` is set for attachments added since load.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAttachment {
    /// Attachment metadata.
    pub attachment: AttachmentRef,
    /// Uploaded content for new attachments.
    pub content: Option<Vec<u8>>,
}

/// A link to be created when the draft is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    /// Link type end name.
    pub link_type: String,
    /// Originating endpoint.
    pub source_id: EntityId,
    /// Destination endpoint.
    pub target_id: EntityId,
    /// Timestamp recorded on the link.
    pub changed_at: DateTime<Utc>,
}

/// Local working copy of a target entity.
#[derive(Debug, Clone)]
pub struct EntityDraft {
    id: Option<EntityId>,
    entity_type: String,
    fields: BTreeMap<String, DraftField>,
    attachments: Vec<DraftAttachment>,
    links: Vec<NewLink>,
}

impl EntityDraft {
    /// Create a draft for a new entity.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            attachments: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Create a draft for an existing entity.
    pub fn existing(id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            ..Self::new(entity_type)
        }
    }

    /// Declare a field on the draft.
    pub fn with_field(mut self, name: impl Into<String>, field: DraftField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Add an attachment that already exists on the stored entity.
    pub fn with_existing_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(DraftAttachment {
            attachment,
            content: None,
        });
        self
    }

    /// Target store id; `None` until a new entity has been saved.
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Check whether the draft is for an entity not yet saved.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Work item type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Look up a field. Reference names match case-insensitively.
    pub fn field(&self, name: &str) -> Option<&DraftField> {
        self.fields.get(name).or_else(|| {
            self.fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, field)| field)
        })
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut DraftField> {
        if self.fields.contains_key(name) {
            return self.fields.get_mut(name);
        }
        self.fields
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, field)| field)
    }

    /// Current value of a field.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name).map(|field| &field.value)
    }

    /// Iterate over all fields.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &DraftField)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Check whether a field exists and accepts writes.
    pub fn is_editable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|field| field.editable)
    }

    /// Assign a field value.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), DraftError> {
        let field = self
            .field_mut(name)
            .ok_or_else(|| DraftError::UnknownField(name.to_string()))?;
        if !field.editable {
            return Err(DraftError::ReadOnly(name.to_string()));
        }
        field.value = value;
        Ok(())
    }

    /// Current attachment snapshot.
    pub fn attachments(&self) -> &[DraftAttachment] {
        &self.attachments
    }

    /// Add a new attachment with its content.
    pub fn add_attachment(&mut self, attachment: AttachmentRef, content: Vec<u8>) {
        self.attachments.push(DraftAttachment {
            attachment,
            content: Some(content),
        });
    }

    /// Remove the attachment with the same identity as `attachment`.
    ///
    /// Returns whether an attachment was removed.
    pub fn remove_attachment(&mut self, attachment: &AttachmentRef) -> bool {
        match self
            .attachments
            .iter()
            .position(|existing| existing.attachment.same_identity(attachment))
        {
            Some(pos) => {
                self.attachments.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Queue a link for creation on save.
    pub fn add_link(&mut self, link: NewLink) {
        self.links.push(link);
    }

    /// Links queued for creation.
    pub fn links(&self) -> &[NewLink] {
        &self.links
    }
}
