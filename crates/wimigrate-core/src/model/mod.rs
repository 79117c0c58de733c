//! Domain model shared by the ledger, transformation engine and store clients.

pub mod draft;
pub mod entity;
pub mod node;
pub mod value;

pub use draft::{DraftAttachment, DraftError, DraftField, EntityDraft, FieldError, NewLink};
pub use entity::{AttachmentRef, LinkRecord, SourceEntity, SourceRevision};
pub use node::{Node, NodeKind};
pub use value::{EntityId, FieldValue};
