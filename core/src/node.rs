//! Tree nodes for specification content.
//!
//! A specification table becomes a tree of [`Node`]s: one node per data row,
//! nested according to the `>` markers in the name column. Every node carries
//! a dynamic attribute bag whose keys are declared by the table's column map
//! and whose order reflects the column order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single attribute value in a node's attribute bag.
///
/// Columns parsed with the unformatted option keep the cell's inner XML as
/// [`Value::Html`]; all other cells are plain text. Cells covered by a
/// column span are recorded as [`Value::Null`] to keep the bag aligned with
/// the column map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Extracted plain text.
    Text(String),
    /// Raw inner XML of the table cell.
    Html(String),
    /// Attribute declared by the column map but not set on this row.
    Null,
}

impl Value {
    /// Returns the string content of a text or HTML value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Html(s) => Some(s),
            Value::Null => None,
        }
    }

    /// Whether the value carries content (text or HTML, not null).
    pub fn is_set(&self) -> bool {
        !matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A node of a specification content tree.
///
/// Nodes own their children, so the tree shape invariant (one parent per
/// node, a single root) holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Sanitized node name (lower-case ASCII, `-` for parentheses,
    /// `_` for spaces, hyphens, and apostrophes).
    pub name: String,
    /// Attribute bag, in column order.
    #[serde(flatten)]
    pub attrs: IndexMap<String, Value>,
    /// Child nodes, in source row order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// Creates a node with no attributes and no children.
    pub fn new(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            attrs: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Creates a node with the given attribute bag.
    pub fn with_attrs(name: impl Into<String>, attrs: IndexMap<String, Value>) -> Self {
        Node {
            name: name.into(),
            attrs,
            children: Vec::new(),
        }
    }

    /// Returns the attribute value if present.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Returns the attribute's string content if present and non-null.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    /// Whether the attribute is present with a non-null value.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.get(name).is_some_and(Value::is_set)
    }

    /// Sets or replaces an attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    /// Pre-order iteration over this node and all of its descendants.
    pub fn iter(&self) -> PreOrderIter<'_> {
        PreOrderIter { stack: vec![self] }
    }

    /// Mutable visit of this node and all descendants, pre-order.
    pub fn for_each_mut<F: FnMut(&mut Node)>(&mut self, f: &mut F) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }

    /// Returns the node at the given path of child indices, if any.
    pub fn node_at(&self, path: &[usize]) -> Option<&Node> {
        let mut node = self;
        for &idx in path {
            node = node.children.get(idx)?;
        }
        Some(node)
    }

    /// Mutable counterpart of [`Node::node_at`].
    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = self;
        for &idx in path {
            node = node.children.get_mut(idx)?;
        }
        Some(node)
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }
}

/// Iterator returned by [`Node::iter`].
#[derive(Debug)]
pub struct PreOrderIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for PreOrderIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so that the leftmost child is visited first.
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}
