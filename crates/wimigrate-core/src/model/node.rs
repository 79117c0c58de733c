//! Hierarchical classification nodes (areas and iterations).

use serde::{Deserialize, Serialize};

/// Which classification tree a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Area tree.
    Area,
    /// Iteration tree.
    Iteration,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Area => write!(f, "area"),
            NodeKind::Iteration => write!(f, "iteration"),
        }
    }
}

/// A node in a classification tree. The root node represents the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned numeric id.
    pub id: i64,
    /// Node name, unique among siblings.
    pub name: String,
    /// Child nodes.
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    /// Create a leaf node.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Add a child node.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Find a node anywhere below this one by name (depth first).
    pub fn find_in_subtree(&self, name: &str) -> Option<&Node> {
        self.children.iter().find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                child.find_in_subtree(name)
            }
        })
    }

    /// Find a node by id in this subtree, including this node.
    pub fn find_by_id(&self, id: i64) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    /// Mutable variant of [`Node::find_by_id`].
    pub fn find_by_id_mut(&mut self, id: i64) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// Largest id in this subtree.
    pub fn max_id(&self) -> i64 {
        self.children
            .iter()
            .map(Node::max_id)
            .fold(self.id, i64::max)
    }
}
