//! Area/iteration node identity maps and node tree cloning.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::error::MappingError;
use crate::model::{Node, NodeKind};
use crate::store::{SourceStore, TargetStore};

/// Source node id → target node id for one classification tree.
///
/// Built once per run by matching the trees by name. Lookups that miss fall
/// back to a target root node so identity fields are never left unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentityMap {
    kind: NodeKind,
    entries: HashMap<i64, i64>,
    fallback: i64,
}

impl NodeIdentityMap {
    /// Match `source_root` against `target_root` by node name, recursively.
    ///
    /// With a `sub_root`, source nodes are matched against the children of the
    /// named target node instead of the target project's top level.
    pub fn build(
        kind: NodeKind,
        source_root: &Node,
        target_root: &Node,
        sub_root: Option<&str>,
    ) -> Result<Self, MappingError> {
        let base = resolve_base(kind, target_root, sub_root)?;

        let mut entries = HashMap::new();
        entries.insert(source_root.id, base.id);
        match_children(kind, source_root, base, &mut entries);

        debug!(%kind, mapped = entries.len(), "built node identity map");
        Ok(Self {
            kind,
            entries,
            fallback: target_root.id,
        })
    }

    /// Map every source node onto a single target node.
    pub fn collapsed(kind: NodeKind, target_root: &Node, sub_root: Option<&str>) -> Result<Self, MappingError> {
        let base = resolve_base(kind, target_root, sub_root)?;
        Ok(Self {
            kind,
            entries: HashMap::new(),
            fallback: base.id,
        })
    }

    /// Build from explicit pairs.
    pub fn from_pairs(kind: NodeKind, pairs: impl IntoIterator<Item = (i64, i64)>, fallback: i64) -> Self {
        Self {
            kind,
            entries: pairs.into_iter().collect(),
            fallback,
        }
    }

    /// Tree this map covers.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Matched target node, if any.
    pub fn get(&self, source_id: i64) -> Option<i64> {
        self.entries.get(&source_id).copied()
    }

    /// Matched target node, or the fallback root.
    pub fn resolve(&self, source_id: i64) -> i64 {
        self.get(source_id).unwrap_or(self.fallback)
    }

    /// Node used when a source node has no match.
    pub fn fallback(&self) -> i64 {
        self.fallback
    }

    /// Number of matched nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no nodes were matched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_base<'a>(kind: NodeKind, target_root: &'a Node, sub_root: Option<&str>) -> Result<&'a Node, MappingError> {
    match sub_root {
        Some(name) => target_root
            .find_in_subtree(name)
            .ok_or_else(|| MappingError::SubRootNotFound {
                kind,
                name: name.to_string(),
            }),
        None => Ok(target_root),
    }
}

fn match_children(kind: NodeKind, source: &Node, target: &Node, entries: &mut HashMap<i64, i64>) {
    for child in &source.children {
        match target.child(&child.name) {
            Some(matched) => {
                entries.insert(child.id, matched.id);
                match_children(kind, child, matched, entries);
            }
            None => warn!(
                %kind,
                node = %child.name,
                "no matching target node; entities under it fall back to the project root"
            ),
        }
    }
}

/// Copy the source project's node tree into the target project.
///
/// Missing nodes are created by name and existing ones are reused, so the
/// target tree is merged, never pruned. With a `sub_root` the copy is placed
/// under that node (created first if needed). Without one, the copy goes to
/// the top level, which is refused when `migrated_entities` is non-zero.
///
/// Returns the number of source nodes copied.
pub async fn clone_node_tree<S, T>(
    source: &S,
    target: &T,
    kind: NodeKind,
    sub_root: Option<&str>,
    migrated_entities: usize,
) -> Result<usize, MappingError>
where
    S: SourceStore + ?Sized,
    T: TargetStore + ?Sized,
{
    if sub_root.is_none() && migrated_entities > 0 {
        return Err(MappingError::NodesInUse {
            count: migrated_entities,
        });
    }

    let source_tree = source.fetch_node_tree(kind).await?;
    let target_tree = target.fetch_node_tree(kind).await?;

    let base = match sub_root {
        Some(name) => target.create_node(kind, target_tree.id, name).await?,
        None => target_tree.id,
    };

    let mut copied = 0;
    let mut stack: Vec<(&Node, i64)> = source_tree.children.iter().rev().map(|n| (n, base)).collect();
    while let Some((node, parent)) = stack.pop() {
        let id = target.create_node(kind, parent, &node.name).await?;
        copied += 1;
        stack.extend(node.children.iter().rev().map(|child| (child, id)));
    }

    info!(%kind, copied, sub_root = sub_root.unwrap_or(""), "cloned node tree");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Snapshot};

    fn source_tree() -> Node {
        Node::new(10, "Legacy")
            .with_child(Node::new(11, "Web").with_child(Node::new(12, "Login")))
            .with_child(Node::new(13, "Api"))
    }

    #[test]
    fn test_build_matches_by_name() {
        let target = Node::new(1, "Platform")
            .with_child(Node::new(5, "Web").with_child(Node::new(6, "Login")))
            .with_child(Node::new(7, "Mobile"));

        let map = NodeIdentityMap::build(NodeKind::Area, &source_tree(), &target, None).unwrap();
        assert_eq!(map.get(10), Some(1));
        assert_eq!(map.get(11), Some(5));
        assert_eq!(map.get(12), Some(6));
        assert_eq!(map.get(13), None);
        assert_eq!(map.resolve(13), 1);
        assert_eq!(map.resolve(999), 1);
    }

    #[test]
    fn test_build_under_sub_root() {
        let target = Node::new(1, "Platform").with_child(
            Node::new(20, "Legacy").with_child(Node::new(21, "Api")),
        );

        let map = NodeIdentityMap::build(NodeKind::Iteration, &source_tree(), &target, Some("Legacy")).unwrap();
        assert_eq!(map.get(10), Some(20));
        assert_eq!(map.get(13), Some(21));
        assert_eq!(map.fallback(), 1);

        let missing = NodeIdentityMap::build(NodeKind::Iteration, &source_tree(), &target, Some("Other"));
        assert!(matches!(missing, Err(MappingError::SubRootNotFound { .. })));
    }

    #[test]
    fn test_collapsed_map() {
        let target = Node::new(1, "Platform").with_child(Node::new(20, "Legacy"));
        let map = NodeIdentityMap::collapsed(NodeKind::Area, &target, Some("Legacy")).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.resolve(11), 20);
    }

    #[tokio::test]
    async fn test_clone_node_tree_merges() {
        let source = MemoryStore::new(Snapshot::new("http://tracker/a", "Legacy"));
        source.set_node_tree(NodeKind::Area, source_tree());
        let target = MemoryStore::new(Snapshot::new("http://tracker/b", "Platform"));

        let copied = clone_node_tree(&source, &target, NodeKind::Area, Some("Legacy"), 3)
            .await
            .unwrap();
        assert_eq!(copied, 3);

        let again = clone_node_tree(&source, &target, NodeKind::Area, Some("Legacy"), 3)
            .await
            .unwrap();
        assert_eq!(again, 3);

        let tree = TargetStore::fetch_node_tree(&target, NodeKind::Area).await.unwrap();
        let legacy = tree.child("Legacy").unwrap();
        assert_eq!(legacy.children.len(), 2);
        assert!(legacy.child("Web").unwrap().child("Login").is_some());

        let map = NodeIdentityMap::build(NodeKind::Area, &source_tree(), &tree, Some("Legacy")).unwrap();
        assert_eq!(map.len(), 4);
    }

    #[tokio::test]
    async fn test_clone_without_sub_root_refused_when_in_use() {
        let source = MemoryStore::new(Snapshot::new("http://tracker/a", "Legacy"));
        let target = MemoryStore::new(Snapshot::new("http://tracker/b", "Platform"));

        let err = clone_node_tree(&source, &target, NodeKind::Area, None, 1).await.unwrap_err();
        assert!(matches!(err, MappingError::NodesInUse { count: 1 }));
    }
}
