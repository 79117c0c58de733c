//! In-memory tracker collection backed by a JSON snapshot.
//!
//! Implements both [`SourceStore`] and [`TargetStore`], so a target snapshot
//! written by one migration can be the source of the next. Used for offline
//! rehearsal runs and by the test suite, which relies on the save counter and
//! fault injection.
//!
//! A store opened with [`MemoryStore::open`] writes its snapshot back to disk
//! after every save and node creation, so the file never lags behind the
//! rows the ledger has marked migrated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SourceStore, StoreError, TargetStore};
use crate::model::{
    AttachmentRef, DraftField, EntityDraft, EntityId, FieldError, FieldValue, LinkRecord, Node,
    NodeKind, SourceEntity, SourceRevision,
};

/// Field holding the workflow state, used for state-locked fields.
const STATE_FIELD: &str = "System.State";
/// Field whose value becomes the revision's change date.
const CHANGED_DATE_FIELD: &str = "System.ChangedDate";

fn default_true() -> bool {
    true
}

/// Definition of one field of a work item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Whether the field accepts writes.
    #[serde(default = "default_true")]
    pub editable: bool,
    /// Whether a save requires a value.
    #[serde(default)]
    pub required: bool,
    /// Permitted values; empty means free-form.
    #[serde(default)]
    pub allowed_values: Vec<String>,
    /// Workflow states in which the field becomes read-only.
    #[serde(default)]
    pub locked_in_states: Vec<String>,
}

impl Default for FieldDef {
    fn default() -> Self {
        Self {
            editable: true,
            required: false,
            allowed_values: Vec::new(),
            locked_in_states: Vec::new(),
        }
    }
}

impl FieldDef {
    /// A read-only field.
    pub fn read_only() -> Self {
        Self {
            editable: false,
            ..Self::default()
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict the field to a list of values.
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Make the field read-only while the entity is in `state`.
    pub fn locked_in(mut self, state: impl Into<String>) -> Self {
        self.locked_in_states.push(state.into());
        self
    }

    fn is_editable_in(&self, state: Option<&str>) -> bool {
        self.editable
            && !state.is_some_and(|state| self.locked_in_states.iter().any(|s| s == state))
    }
}

/// Definition of a work item type: its fields by reference name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemTypeDef {
    /// Field definitions.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
}

impl WorkItemTypeDef {
    /// Create a type with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition.
    pub fn with_field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }
}

/// Serialized form of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Collection url.
    pub collection: String,
    /// Project name.
    pub project: String,
    /// Work item type definitions by type name.
    #[serde(default)]
    pub work_item_types: BTreeMap<String, WorkItemTypeDef>,
    /// Entities with their full history.
    #[serde(default)]
    pub entities: BTreeMap<EntityId, SourceEntity>,
    /// Area tree root.
    pub area_root: Node,
    /// Iteration tree root.
    pub iteration_root: Node,
    /// Attachment content by uri.
    #[serde(default)]
    pub blobs: BTreeMap<String, Vec<u8>>,
}

impl Snapshot {
    /// Create an empty collection with bare area and iteration roots.
    pub fn new(collection: impl Into<String>, project: impl Into<String>) -> Self {
        let project = project.into();
        Self {
            collection: collection.into(),
            area_root: Node::new(1, project.clone()),
            iteration_root: Node::new(2, project.clone()),
            project,
            work_item_types: BTreeMap::new(),
            entities: BTreeMap::new(),
            blobs: BTreeMap::new(),
        }
    }

    fn root(&self, kind: NodeKind) -> &Node {
        match kind {
            NodeKind::Area => &self.area_root,
            NodeKind::Iteration => &self.iteration_root,
        }
    }

    fn root_mut(&mut self, kind: NodeKind) -> &mut Node {
        match kind {
            NodeKind::Area => &mut self.area_root,
            NodeKind::Iteration => &mut self.iteration_root,
        }
    }

    fn type_def(&self, entity_type: &str) -> Result<&WorkItemTypeDef, StoreError> {
        self.work_item_types
            .get(entity_type)
            .ok_or_else(|| StoreError::Rejected(format!("unknown work item type '{entity_type}'")))
    }

    fn next_entity_id(&self) -> EntityId {
        self.entities.keys().next_back().map_or(1, |id| id + 1)
    }

    fn validate(&self, draft: &EntityDraft) -> Result<Vec<FieldError>, StoreError> {
        let def = self.type_def(draft.entity_type())?;
        let mut errors = Vec::new();

        for (name, field) in &def.fields {
            let value = draft.value(name).unwrap_or(&FieldValue::Null);
            let empty = value.is_null() || value.as_str().is_some_and(str::is_empty);

            if field.required && empty {
                errors.push(FieldError::new(name.clone(), "InvalidEmpty"));
            } else if !field.allowed_values.is_empty() && !empty {
                if let Some(text) = value.as_str() {
                    if !field.allowed_values.iter().any(|allowed| allowed == text) {
                        errors.push(FieldError::new(name.clone(), "InvalidListValue"));
                    }
                }
            }
        }
        Ok(errors)
    }
}

/// Replace `path` with the serialized snapshot via a temporary file.
fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail this many upcoming saves with a transient error.
    transient_failures: usize,
    /// Fail every save once this many saves have succeeded.
    fail_after_saves: Option<usize>,
}

/// In-memory collection implementing both store traits.
pub struct MemoryStore {
    collection: String,
    project: String,
    state: Mutex<Snapshot>,
    backing: Option<PathBuf>,
    faults: Mutex<Faults>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Wrap a snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            collection: snapshot.collection.clone(),
            project: snapshot.project.clone(),
            state: Mutex::new(snapshot),
            backing: None,
            faults: Mutex::new(Faults::default()),
            saves: AtomicUsize::new(0),
        }
    }

    /// Load a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        Ok(Self::new(snapshot))
    }

    /// Load a snapshot file and keep it in sync with every write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        Ok(Self {
            backing: Some(path.to_path_buf()),
            ..Self::load(path)?
        })
    }

    /// Snapshot file this store writes through to, if any.
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_deref()
    }

    /// Write the current state to a snapshot file.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        write_snapshot(path.as_ref(), &self.state.lock())
    }

    fn write_through(&self, state: &Snapshot) -> Result<(), StoreError> {
        match &self.backing {
            Some(path) => write_snapshot(path, state),
            None => Ok(()),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().clone()
    }

    /// Register a work item type.
    pub fn define_type(&self, name: impl Into<String>, def: WorkItemTypeDef) {
        self.state.lock().work_item_types.insert(name.into(), def);
    }

    /// Insert or replace an entity with its history.
    pub fn insert_entity(&self, entity: SourceEntity) {
        self.state.lock().entities.insert(entity.id, entity);
    }

    /// Store attachment content under its uri.
    pub fn insert_blob(&self, uri: impl Into<String>, content: Vec<u8>) {
        self.state.lock().blobs.insert(uri.into(), content);
    }

    /// Replace a node tree.
    pub fn set_node_tree(&self, kind: NodeKind, root: Node) {
        *self.state.lock().root_mut(kind) = root;
    }

    /// Copy of a stored entity.
    pub fn entity(&self, id: EntityId) -> Option<SourceEntity> {
        self.state.lock().entities.get(&id).cloned()
    }

    /// Number of stored entities.
    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Number of successful saves since creation.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Fail the next `count` saves with a transient error.
    pub fn fail_next_saves(&self, count: usize) {
        self.faults.lock().transient_failures = count;
    }

    /// Fail every save after `count` successful saves, simulating a lost connection.
    pub fn fail_after_saves(&self, count: usize) {
        self.faults.lock().fail_after_saves = Some(count);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn check_faults(&self) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        if faults.transient_failures > 0 {
            faults.transient_failures -= 1;
            return Err(StoreError::Transient("injected service fault".to_string()));
        }
        if let Some(limit) = faults.fail_after_saves {
            if self.save_count() >= limit {
                return Err(StoreError::Transient("connection reset".to_string()));
            }
        }
        Ok(())
    }

    fn draft_for(
        def: &WorkItemTypeDef,
        entity_type: &str,
        id: Option<EntityId>,
        latest: Option<&SourceRevision>,
    ) -> EntityDraft {
        let state = latest
            .and_then(|rev| rev.field(STATE_FIELD))
            .and_then(FieldValue::as_str);
        let draft = match id {
            Some(id) => EntityDraft::existing(id, entity_type),
            None => EntityDraft::new(entity_type),
        };

        def.fields.iter().fold(draft, |draft, (name, field)| {
            let value = latest
                .and_then(|rev| rev.field(name))
                .cloned()
                .unwrap_or_default();
            draft.with_field(name.clone(), DraftField::new(value, field.is_editable_in(state)))
        })
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn list_entities(&self) -> Result<Vec<EntityId>, StoreError> {
        Ok(self.state.lock().entities.keys().copied().collect())
    }

    async fn fetch_entity(&self, id: EntityId) -> Result<SourceEntity, StoreError> {
        self.entity(id)
            .ok_or_else(|| StoreError::not_found(format!("entity {id}")))
    }

    async fn fetch_node_tree(&self, kind: NodeKind) -> Result<Node, StoreError> {
        Ok(self.state.lock().root(kind).clone())
    }

    async fn fetch_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>, StoreError> {
        self.state
            .lock()
            .blobs
            .get(&attachment.uri)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("attachment '{}'", attachment.uri)))
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn project(&self) -> &str {
        &self.project
    }

    async fn create_entity(&self, entity_type: &str) -> Result<EntityDraft, StoreError> {
        let state = self.state.lock();
        let def = state.type_def(entity_type)?;
        Ok(Self::draft_for(def, entity_type, None, None))
    }

    async fn open_entity(&self, id: EntityId) -> Result<EntityDraft, StoreError> {
        let state = self.state.lock();
        let entity = state
            .entities
            .get(&id)
            .ok_or_else(|| StoreError::not_found(format!("entity {id}")))?;
        let def = state.type_def(&entity.entity_type)?;
        let latest = entity.revisions.last();

        let mut draft = Self::draft_for(def, &entity.entity_type, Some(id), latest);
        for attachment in latest.map(|rev| rev.attachments.as_slice()).unwrap_or_default() {
            draft = draft.with_existing_attachment(attachment.clone());
        }
        Ok(draft)
    }

    async fn validate(&self, draft: &EntityDraft) -> Result<Vec<FieldError>, StoreError> {
        self.state.lock().validate(draft)
    }

    async fn save(&self, draft: EntityDraft) -> Result<EntityId, StoreError> {
        self.check_faults()?;

        let mut state = self.state.lock();
        let errors = state.validate(&draft)?;
        if !errors.is_empty() {
            let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(StoreError::Rejected(errors.join("; ")));
        }

        let id = match draft.id() {
            Some(id) if state.entities.contains_key(&id) => id,
            Some(id) => return Err(StoreError::not_found(format!("entity {id}"))),
            None => state.next_entity_id(),
        };
        let changed_at = draft
            .value(CHANGED_DATE_FIELD)
            .and_then(FieldValue::as_datetime)
            .unwrap_or_else(Utc::now);

        let mut attachments = Vec::with_capacity(draft.attachments().len());
        for item in draft.attachments() {
            let mut attachment = item.attachment.clone();
            if let Some(content) = &item.content {
                attachment.uri = format!("mem://{}/{}/{}/{}", self.collection, self.project, id, attachment.name);
                state.blobs.insert(attachment.uri.clone(), content.clone());
            }
            attachments.push(attachment);
        }

        let entity = state.entities.entry(id).or_insert_with(|| SourceEntity {
            id,
            entity_type: draft.entity_type().to_string(),
            revisions: Vec::new(),
            links: Vec::new(),
        });
        entity.revisions.push(SourceRevision {
            index: entity.revisions.len(),
            changed_at,
            fields: draft
                .fields()
                .map(|(name, field)| (name.to_string(), field.value.clone()))
                .collect(),
            attachments,
        });

        let mut mirrored = Vec::new();
        for link in draft.links() {
            let other = if link.source_id == id { link.target_id } else { link.source_id };
            if entity.active_link_to(other).is_some() {
                continue;
            }
            let record = LinkRecord {
                link_type: link.link_type.clone(),
                source_id: link.source_id,
                target_id: link.target_id,
                added_at: link.changed_at,
                removed_at: None,
            };
            entity.links.push(record.clone());
            mirrored.push((other, record));
        }
        for (other, record) in mirrored {
            if other == id {
                continue;
            }
            if let Some(other_entity) = state.entities.get_mut(&other) {
                other_entity.links.push(record);
            }
        }
        self.write_through(&state)?;

        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!(entity = id, saves = self.save_count(), "saved entity");
        Ok(id)
    }

    async fn link_exists(&self, a: EntityId, b: EntityId) -> Result<bool, StoreError> {
        let state = self.state.lock();
        let on = |from: EntityId, to: EntityId| {
            state
                .entities
                .get(&from)
                .is_some_and(|entity| entity.active_link_to(to).is_some())
        };
        Ok(on(a, b) || on(b, a))
    }

    async fn fetch_node_tree(&self, kind: NodeKind) -> Result<Node, StoreError> {
        Ok(self.state.lock().root(kind).clone())
    }

    async fn create_node(&self, kind: NodeKind, parent: i64, name: &str) -> Result<i64, StoreError> {
        let mut state = self.state.lock();
        let next_id = state.area_root.max_id().max(state.iteration_root.max_id()) + 1;

        let parent_node = state
            .root_mut(kind)
            .find_by_id_mut(parent)
            .ok_or_else(|| StoreError::not_found(format!("{kind} node {parent}")))?;
        if let Some(existing) = parent_node.child(name) {
            return Ok(existing.id);
        }
        parent_node.children.push(Node::new(next_id, name));
        self.write_through(&state)?;
        Ok(next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewLink;
    use chrono::{DateTime, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_440_000_000 + secs, 0).unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new(Snapshot::new("http://tracker/target", "Platform"));
        store.define_type(
            "Bug",
            WorkItemTypeDef::new()
                .with_field("System.Title", FieldDef::default().required())
                .with_field(
                    "System.State",
                    FieldDef::default().with_allowed_values(["New", "Active", "Closed"]),
                )
                .with_field("System.ChangedDate", FieldDef::default())
                .with_field("System.Id", FieldDef::read_only())
                .with_field("Custom.Estimate", FieldDef::default().locked_in("Closed")),
        );
        store
    }

    async fn create(store: &MemoryStore, title: &str, at: i64) -> EntityId {
        let mut draft = store.create_entity("Bug").await.unwrap();
        draft.set_field("System.Title", title.into()).unwrap();
        draft.set_field("System.ChangedDate", ts(at).into()).unwrap();
        store.save(draft).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_reopen() {
        let store = store();
        let id = create(&store, "Crash on login", 1).await;

        let draft = store.open_entity(id).await.unwrap();
        assert_eq!(draft.id(), Some(id));
        assert_eq!(draft.value("System.Title"), Some(&FieldValue::from("Crash on login")));
        assert!(!draft.is_editable("System.Id"));
        assert_eq!(store.save_count(), 1);

        let entity = store.entity(id).unwrap();
        assert_eq!(entity.revisions.len(), 1);
        assert_eq!(entity.revisions[0].changed_at, ts(1));
    }

    #[tokio::test]
    async fn test_fetch_revision() {
        let store = store();
        let id = create(&store, "First", 1).await;
        let mut draft = store.open_entity(id).await.unwrap();
        draft.set_field("System.Title", "Second".into()).unwrap();
        draft.set_field("System.ChangedDate", ts(2).into()).unwrap();
        store.save(draft).await.unwrap();

        let revision = store.fetch_revision(id, 1).await.unwrap();
        assert_eq!(revision.index, 1);
        assert_eq!(revision.changed_at, ts(2));
        assert_eq!(revision.field("System.Title"), Some(&FieldValue::from("Second")));

        let err = store.fetch_revision(id, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.fetch_revision(99, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let store = store();
        let mut draft = store.create_entity("Bug").await.unwrap();
        draft.set_field("System.State", "Resolved".into()).unwrap();

        let errors = store.validate(&draft).await.unwrap();
        assert_eq!(
            errors,
            vec![
                FieldError::new("System.State", "InvalidListValue"),
                FieldError::new("System.Title", "InvalidEmpty"),
            ]
        );
        assert!(matches!(store.save(draft).await, Err(StoreError::Rejected(_))));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_state_locked_field() {
        let store = store();
        let id = create(&store, "Crash", 1).await;

        let mut draft = store.open_entity(id).await.unwrap();
        assert!(draft.is_editable("Custom.Estimate"));
        draft.set_field("System.State", "Closed".into()).unwrap();
        store.save(draft).await.unwrap();

        let draft = store.open_entity(id).await.unwrap();
        assert!(!draft.is_editable("Custom.Estimate"));
    }

    #[tokio::test]
    async fn test_links_are_bidirectional() {
        let store = store();
        let a = create(&store, "A", 1).await;
        let b = create(&store, "B", 2).await;

        store
            .create_link(a, NewLink {
                link_type: "Related".to_string(),
                source_id: a,
                target_id: b,
                changed_at: ts(3),
            })
            .await
            .unwrap();

        assert!(store.link_exists(a, b).await.unwrap());
        assert!(store.link_exists(b, a).await.unwrap());
        assert_eq!(store.entity(b).unwrap().links.len(), 1);
        assert!(!store.link_exists(a, 99).await.unwrap());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = store();
        store.fail_next_saves(1);

        let mut draft = store.create_entity("Bug").await.unwrap();
        draft.set_field("System.Title", "A".into()).unwrap();
        let err = store.save(draft.clone()).await.unwrap_err();
        assert!(err.is_transient());
        store.save(draft.clone()).await.unwrap();

        store.fail_after_saves(1);
        assert!(store.save(draft.clone()).await.unwrap_err().is_transient());
        store.clear_faults();
        store.save(draft).await.unwrap();
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn test_create_node_merges_by_name() {
        let store = store();
        let web = store.create_node(NodeKind::Area, 1, "Web").await.unwrap();
        let again = store.create_node(NodeKind::Area, 1, "Web").await.unwrap();
        let sprint = store.create_node(NodeKind::Iteration, 2, "Sprint 1").await.unwrap();

        assert_eq!(web, again);
        assert_ne!(web, sprint);
        let tree = TargetStore::fetch_node_tree(&store, NodeKind::Area).await.unwrap();
        assert_eq!(tree.child("Web").map(|n| n.id), Some(web));
        assert!(store.create_node(NodeKind::Area, 42, "X").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.json");
        let store = store();
        let id = create(&store, "Persisted", 1).await;
        store.persist(&path).unwrap();

        let reloaded = MemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.entity(id), store.entity(id));
        assert_eq!(SourceStore::project(&reloaded), "Platform");
    }

    #[tokio::test]
    async fn test_open_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.json");
        store().persist(&path).unwrap();

        let backed = MemoryStore::open(&path).unwrap();
        assert_eq!(backed.backing_path(), Some(path.as_path()));
        let id = create(&backed, "Written", 1).await;
        let web = backed.create_node(NodeKind::Area, 1, "Web").await.unwrap();
        drop(backed);

        let reloaded = MemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.entity(id).map(|e| e.revisions.len()), Some(1));
        let tree = SourceStore::fetch_node_tree(&reloaded, NodeKind::Area).await.unwrap();
        assert_eq!(tree.child("Web").map(|n| n.id), Some(web));
        assert!(reloaded.backing_path().is_none());
        assert!(!dir.path().join("target.json.tmp").exists());
    }
}
