//! Serialized DOM nodes as produced by the recorder

use serde::{Deserialize, Serialize};

/// Identifier the recorder assigns to every DOM node it observes
pub type NodeId = u64;

/// A single element attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A DOM subtree captured by the recorder
///
/// Full snapshots carry the whole document; mutations carry the subtrees
/// they add. Attribute order is preserved as recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum SerializedNode {
    Document {
        id: NodeId,
        #[serde(default)]
        children: Vec<SerializedNode>,
    },
    DocumentType {
        id: NodeId,
        name: String,
    },
    Element {
        id: NodeId,
        tag: String,
        #[serde(default)]
        attributes: Vec<Attribute>,
        #[serde(default)]
        children: Vec<SerializedNode>,
    },
    Text {
        id: NodeId,
        content: String,
    },
    Comment {
        id: NodeId,
        content: String,
    },
}

impl SerializedNode {
    /// Create an element node
    pub fn element(
        id: NodeId,
        tag: impl Into<String>,
        attributes: Vec<Attribute>,
        children: Vec<SerializedNode>,
    ) -> Self {
        Self::Element {
            id,
            tag: tag.into(),
            attributes,
            children,
        }
    }

    /// Create a text node
    pub fn text(id: NodeId, content: impl Into<String>) -> Self {
        Self::Text {
            id,
            content: content.into(),
        }
    }

    /// The recorder-assigned id of this node
    pub fn id(&self) -> NodeId {
        match self {
            Self::Document { id, .. }
            | Self::DocumentType { id, .. }
            | Self::Element { id, .. }
            | Self::Text { id, .. }
            | Self::Comment { id, .. } => *id,
        }
    }

    /// Child nodes (empty for leaves)
    pub fn children(&self) -> &[SerializedNode] {
        match self {
            Self::Document { children, .. } | Self::Element { children, .. } => children,
            _ => &[],
        }
    }

    /// Number of nodes in this subtree, including itself
    pub fn subtree_len(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(SerializedNode::subtree_len)
            .sum::<usize>()
    }
}
