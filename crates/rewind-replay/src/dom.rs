//! Reconstructed DOM
//!
//! A flat map of nodes keyed by the recorder's node ids, with parent and
//! child links. Built from a full snapshot and changed by mutations.

use std::collections::HashMap;

use rewind_core::{
    AttributeChange, Attribute, EnvelopeError, MutationData, NodeId, SerializedNode,
};
use serde::Serialize;

/// Node payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DomNodeKind {
    Document,
    DocumentType { name: String },
    Element { tag: String, attributes: Vec<Attribute> },
    Text { content: String },
    Comment { content: String },
}

/// Value last typed into a form control
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputValue {
    pub text: String,
    pub is_checked: bool,
}

/// A node of the reconstructed document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub kind: DomNodeKind,
    pub children: Vec<NodeId>,
    /// Scroll offset recorded for this node
    pub scroll: (f64, f64),
    pub input: Option<InputValue>,
}

impl DomNode {
    fn new(id: NodeId, parent: Option<NodeId>, kind: DomNodeKind) -> Self {
        Self {
            id,
            parent,
            kind,
            children: Vec::new(),
            scroll: (0.0, 0.0),
            input: None,
        }
    }

    /// Whether the node can hold children
    pub fn is_container(&self) -> bool {
        matches!(self.kind, DomNodeKind::Document | DomNodeKind::Element { .. })
    }

    /// Tag name of an element
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            DomNodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Value of an element attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match &self.kind {
            DomNodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }
}

/// Original state of every node a mutation touched, `None` for new nodes
#[derive(Debug, Default)]
struct Journal {
    root: Option<Option<NodeId>>,
    nodes: HashMap<NodeId, Option<DomNode>>,
}

/// The reconstructed document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dom {
    root: Option<NodeId>,
    nodes: HashMap<NodeId, DomNode>,
}

impl Dom {
    /// Build a document from a full snapshot
    ///
    /// Fails if the snapshot repeats a node id.
    pub fn from_snapshot(snapshot: &SerializedNode) -> Result<Self, EnvelopeError> {
        let mut dom = Self::default();
        dom.insert_subtree(snapshot, None, &mut Journal::default())?;
        dom.root = Some(snapshot.id());
        Ok(dom)
    }

    /// Root node id
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Look up a node
    pub fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(&id)
    }

    /// Whether the node exists
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Apply a mutation atomically
    ///
    /// Changes are applied removes → adds → texts → attributes. If any part
    /// references an invalid node the touched nodes are restored and the
    /// document is left as it was.
    pub fn apply_mutation(&mut self, mutation: &MutationData) -> Result<(), EnvelopeError> {
        let mut journal = Journal::default();
        let result = self.apply_journaled(mutation, &mut journal);
        if result.is_err() {
            self.roll_back(journal);
        }
        result
    }

    fn apply_journaled(
        &mut self,
        mutation: &MutationData,
        journal: &mut Journal,
    ) -> Result<(), EnvelopeError> {
        for removed in &mutation.removes {
            self.remove(removed.parent_id, removed.id, journal)?;
        }
        for added in &mutation.adds {
            self.add(added.parent_id, added.next_id, &added.node, journal)?;
        }
        for change in &mutation.texts {
            self.set_text(change.id, &change.value, journal)?;
        }
        for change in &mutation.attributes {
            self.set_attributes(change, journal)?;
        }
        Ok(())
    }

    fn roll_back(&mut self, journal: Journal) {
        for (id, original) in journal.nodes {
            match original {
                Some(node) => {
                    self.nodes.insert(id, node);
                }
                None => {
                    self.nodes.remove(&id);
                }
            }
        }
        if let Some(root) = journal.root {
            self.root = root;
        }
    }

    /// Remember a node's state before its first change
    fn touch(&self, id: NodeId, journal: &mut Journal) {
        journal
            .nodes
            .entry(id)
            .or_insert_with(|| self.nodes.get(&id).cloned());
    }

    /// Record a scroll position
    pub fn scroll(&mut self, id: NodeId, x: f64, y: f64) -> Result<(), EnvelopeError> {
        self.node_mut(id)?.scroll = (x, y);
        Ok(())
    }

    /// Record input into a form control
    pub fn input(&mut self, id: NodeId, text: &str, is_checked: bool) -> Result<(), EnvelopeError> {
        let node = self.node_mut(id)?;
        if node.tag().is_none() {
            return Err(EnvelopeError::NotAnElement(id));
        }
        node.input = Some(InputValue {
            text: text.to_string(),
            is_checked,
        });
        Ok(())
    }

    /// Human-readable description of a node
    ///
    /// Elements are described as `tag`, then `.class` for each class, then
    /// `#id`, then `[name=value]` for every other attribute in order.
    pub fn describe(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return format!("unknown node {id}");
        };

        match &node.kind {
            DomNodeKind::Element { tag, attributes } => {
                let mut description = tag.clone();
                for class in node
                    .attribute("class")
                    .into_iter()
                    .flat_map(str::split_whitespace)
                {
                    description.push('.');
                    description.push_str(class);
                }
                if let Some(element_id) = node.attribute("id").filter(|v| !v.is_empty()) {
                    description.push('#');
                    description.push_str(element_id);
                }
                for attribute in attributes
                    .iter()
                    .filter(|a| a.name != "class" && a.name != "id")
                {
                    description.push_str(&format!("[{}={}]", attribute.name, attribute.value));
                }
                description
            }
            DomNodeKind::Text { .. } => "#text".to_string(),
            DomNodeKind::Comment { .. } => "#comment".to_string(),
            DomNodeKind::Document => "#document".to_string(),
            DomNodeKind::DocumentType { name } => format!("<!DOCTYPE {name}>"),
        }
    }

    /// Concatenated text of a subtree
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if let DomNodeKind::Text { content } = &node.kind {
            out.push_str(content);
        }
        for child in &node.children {
            self.collect_text(*child, out);
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut DomNode, EnvelopeError> {
        self.nodes.get_mut(&id).ok_or(EnvelopeError::UnknownNode(id))
    }

    fn insert_subtree(
        &mut self,
        node: &SerializedNode,
        parent: Option<NodeId>,
        journal: &mut Journal,
    ) -> Result<(), EnvelopeError> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(EnvelopeError::DuplicateNode(id));
        }
        self.touch(id, journal);

        let kind = match node {
            SerializedNode::Document { .. } => DomNodeKind::Document,
            SerializedNode::DocumentType { name, .. } => DomNodeKind::DocumentType { name: name.clone() },
            SerializedNode::Element {
                tag, attributes, ..
            } => DomNodeKind::Element {
                tag: tag.clone(),
                attributes: attributes.clone(),
            },
            SerializedNode::Text { content, .. } => DomNodeKind::Text {
                content: content.clone(),
            },
            SerializedNode::Comment { content, .. } => DomNodeKind::Comment {
                content: content.clone(),
            },
        };

        let mut dom_node = DomNode::new(id, parent, kind);
        dom_node.children = node.children().iter().map(SerializedNode::id).collect();
        self.nodes.insert(id, dom_node);

        for child in node.children() {
            self.insert_subtree(child, Some(id), journal)?;
        }
        Ok(())
    }

    fn remove(
        &mut self,
        parent_id: NodeId,
        id: NodeId,
        journal: &mut Journal,
    ) -> Result<(), EnvelopeError> {
        let node = self.nodes.get(&id).ok_or(EnvelopeError::UnknownNode(id))?;
        if node.parent != Some(parent_id) {
            return Err(EnvelopeError::NotAChild {
                parent: parent_id,
                id,
            });
        }

        self.touch(parent_id, journal);
        let parent = self.node_mut(parent_id)?;
        parent.children.retain(|child| *child != id);

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(removed) = self.nodes.remove(&next) {
                stack.extend(removed.children.iter().copied());
                journal.nodes.entry(next).or_insert(Some(removed));
            }
        }
        if self.root == Some(id) {
            journal.root.get_or_insert(self.root);
            self.root = None;
        }
        Ok(())
    }

    fn add(
        &mut self,
        parent_id: NodeId,
        next_id: Option<NodeId>,
        node: &SerializedNode,
        journal: &mut Journal,
    ) -> Result<(), EnvelopeError> {
        let parent = self
            .nodes
            .get(&parent_id)
            .ok_or(EnvelopeError::UnknownNode(parent_id))?;
        if !parent.is_container() {
            return Err(EnvelopeError::NotAContainer(parent_id));
        }
        let position = match next_id {
            Some(next) => Some(
                parent
                    .children
                    .iter()
                    .position(|child| *child == next)
                    .ok_or(EnvelopeError::NotAChild {
                        parent: parent_id,
                        id: next,
                    })?,
            ),
            None => None,
        };

        self.insert_subtree(node, Some(parent_id), journal)?;

        self.touch(parent_id, journal);
        let parent = self.node_mut(parent_id)?;
        match position {
            Some(index) => parent.children.insert(index, node.id()),
            None => parent.children.push(node.id()),
        }
        Ok(())
    }

    fn set_text(&mut self, id: NodeId, value: &str, journal: &mut Journal) -> Result<(), EnvelopeError> {
        self.touch(id, journal);
        match &mut self.node_mut(id)?.kind {
            DomNodeKind::Text { content } | DomNodeKind::Comment { content } => {
                *content = value.to_string();
                Ok(())
            }
            _ => Err(EnvelopeError::NotText(id)),
        }
    }

    fn set_attributes(
        &mut self,
        change: &AttributeChange,
        journal: &mut Journal,
    ) -> Result<(), EnvelopeError> {
        self.touch(change.id, journal);
        let DomNodeKind::Element { attributes, .. } = &mut self.node_mut(change.id)?.kind else {
            return Err(EnvelopeError::NotAnElement(change.id));
        };

        for (name, value) in &change.attributes {
            let existing = attributes.iter().position(|a| &a.name == name);
            match (existing, value) {
                (Some(index), Some(value)) => attributes[index].value = value.clone(),
                (None, Some(value)) => attributes.push(Attribute::new(name.clone(), value.clone())),
                (Some(index), None) => {
                    attributes.remove(index);
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}
