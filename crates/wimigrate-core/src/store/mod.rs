//! Source and target store clients.
//!
//! The replay engine only talks to trackers through these traits. Remote
//! implementations await network calls; [`MemoryStore`] keeps a whole
//! collection in memory and persists it as a JSON snapshot.

pub mod error;
pub mod memory;

use async_trait::async_trait;

use crate::model::{
    AttachmentRef, EntityDraft, EntityId, FieldError, NewLink, Node, NodeKind, SourceEntity,
    SourceRevision,
};

pub use error::StoreError;
pub use memory::{FieldDef, MemoryStore, Snapshot, WorkItemTypeDef};

/// Read side of a migration: the tracker entities are copied from.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Collection (server) the store belongs to.
    fn collection(&self) -> &str;

    /// Project name.
    fn project(&self) -> &str;

    /// Ids of every entity in the project.
    async fn list_entities(&self) -> Result<Vec<EntityId>, StoreError>;

    /// Fetch an entity with its ordered revisions and link history.
    async fn fetch_entity(&self, id: EntityId) -> Result<SourceEntity, StoreError>;

    /// Fetch the field values of one revision.
    async fn fetch_revision(&self, id: EntityId, index: usize) -> Result<SourceRevision, StoreError> {
        let entity = self.fetch_entity(id).await?;
        entity
            .revisions
            .into_iter()
            .nth(index)
            .ok_or_else(|| StoreError::not_found(format!("entity {id} revision {index}")))
    }

    /// Fetch the area or iteration tree; the root node is the project.
    async fn fetch_node_tree(&self, kind: NodeKind) -> Result<Node, StoreError>;

    /// Download attachment content.
    async fn fetch_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, StoreError>;
}

/// Write side of a migration: the tracker entities are replayed into.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Collection (server) the store belongs to.
    fn collection(&self) -> &str;

    /// Project name.
    fn project(&self) -> &str;

    /// Start a draft for a new entity of the given type.
    async fn create_entity(&self, entity_type: &str) -> Result<EntityDraft, StoreError>;

    /// Open a draft of an existing entity.
    async fn open_entity(&self, id: EntityId) -> Result<EntityDraft, StoreError>;

    /// Field-level validation errors of a draft; empty when it can be saved.
    async fn validate(&self, draft: &EntityDraft) -> Result<Vec<FieldError>, StoreError>;

    /// Persist a draft and return the entity id.
    async fn save(&self, draft: EntityDraft) -> Result<EntityId, StoreError>;

    /// Check whether an active link exists between two entities, in either direction.
    async fn link_exists(&self, a: EntityId, b: EntityId) -> Result<bool, StoreError>;

    /// Create a link by saving it on entity `holder`, one of its endpoints.
    async fn create_link(&self, holder: EntityId, link: NewLink) -> Result<(), StoreError> {
        let mut draft = self.open_entity(holder).await?;
        draft.add_link(link);
        self.save(draft).await?;
        Ok(())
    }

    /// Fetch the area or iteration tree; the root node is the project.
    async fn fetch_node_tree(&self, kind: NodeKind) -> Result<Node, StoreError>;

    /// Create a child node, returning the existing node id when the name is taken.
    async fn create_node(&self, kind: NodeKind, parent: i64, name: &str) -> Result<i64, StoreError>;
}
