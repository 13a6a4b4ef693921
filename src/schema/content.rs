//! Authored content trees: profiles, stories and their nested children.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("{kind:?} node must be a JSON object")]
    NotAnObject { kind: NodeKind },
    #[error("{kind:?} collection '{name}' must be an array")]
    CollectionNotArray { kind: NodeKind, name: String },
    #[error("{kind:?} has no child collection named '{name}'")]
    UnknownCollection { kind: NodeKind, name: String },
    #[error("malformed locale content row: {0}")]
    ContentRow(#[from] serde_json::Error),
}

/// Every kind of node an authored document can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Profile,
    Meta,
    Section,
    Subtitle,
    Description,
    Stat,
    Visualization,
    Selector,
    Story,
    Author,
    Footnote,
    StorySection,
}

impl NodeKind {
    /// Child collections of this kind, in document order.
    pub fn collections(&self) -> &'static [(&'static str, NodeKind)] {
        match self {
            Self::Profile => &[
                ("meta", Self::Meta),
                ("sections", Self::Section),
                ("selectors", Self::Selector),
            ],
            Self::Section => &[
                ("subtitles", Self::Subtitle),
                ("descriptions", Self::Description),
                ("stats", Self::Stat),
                ("visualizations", Self::Visualization),
                ("selectors", Self::Selector),
            ],
            Self::Story => &[
                ("authors", Self::Author),
                ("descriptions", Self::Description),
                ("footnotes", Self::Footnote),
                ("storysections", Self::StorySection),
            ],
            Self::StorySection => &[
                ("subtitles", Self::Subtitle),
                ("descriptions", Self::Description),
                ("stats", Self::Stat),
                ("visualizations", Self::Visualization),
            ],
            Self::Meta
            | Self::Subtitle
            | Self::Description
            | Self::Stat
            | Self::Visualization
            | Self::Selector
            | Self::Author
            | Self::Footnote => &[],
        }
    }

    /// Look up a child collection by its field name.
    pub fn collection(&self, name: &str) -> Option<(&'static str, NodeKind)> {
        self.collections()
            .iter()
            .find(|(collection, _)| *collection == name)
            .copied()
    }

    /// Whether nodes of this kind carry per-locale `content` rows.
    pub fn is_localized(&self) -> bool {
        !matches!(self, Self::Meta | Self::Visualization | Self::Selector)
    }
}

/// One translation of an entity's text fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocaleContentRow {
    pub lang: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A node in an authored document.
///
/// Scalar and free-form fields live in `fields`; the child collections
/// enumerated by [`NodeKind::collections`] live in `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub kind: NodeKind,
    pub fields: Map<String, Value>,
    pub content: Vec<LocaleContentRow>,
    pub children: BTreeMap<&'static str, Vec<ContentNode>>,
}

impl ContentNode {
    pub fn new(kind: NodeKind) -> Self {
        ContentNode {
            kind,
            fields: Map::new(),
            content: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    /// Build a typed tree from its JSON form.
    pub fn from_value(kind: NodeKind, value: Value) -> Result<ContentNode, ContentError> {
        let obj = match value {
            Value::Object(obj) => obj,
            _ => return Err(ContentError::NotAnObject { kind }),
        };

        let mut node = ContentNode::new(kind);
        for (key, value) in obj {
            if key == "content" && kind.is_localized() {
                node.content = match value {
                    Value::Null => Vec::new(),
                    rows => serde_json::from_value(rows)?,
                };
            } else if let Some((name, child_kind)) = kind.collection(&key) {
                let items = match value {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    _ => {
                        return Err(ContentError::CollectionNotArray { kind, name: key });
                    }
                };
                let nodes = items
                    .into_iter()
                    .map(|item| ContentNode::from_value(child_kind, item))
                    .collect::<Result<Vec<_>, _>>()?;
                node.children.insert(name, nodes);
            } else {
                node.fields.insert(key, value);
            }
        }
        Ok(node)
    }

    /// Serialize back to the flat JSON shape consumed by the page renderer.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        for (name, nodes) in &self.children {
            obj.insert(
                name.to_string(),
                Value::Array(nodes.iter().map(ContentNode::to_value).collect()),
            );
        }
        if !self.content.is_empty() {
            let rows = self
                .content
                .iter()
                .map(|row| {
                    let mut obj = row.fields.clone();
                    obj.insert("lang".to_string(), Value::String(row.lang.clone()));
                    Value::Object(obj)
                })
                .collect();
            obj.insert("content".to_string(), Value::Array(rows));
        }
        Value::Object(obj)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn ordering(&self) -> Option<i64> {
        match self.fields.get("ordering")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// True when `key` names this node by numeric id or by slug.
    pub fn matches_key(&self, key: &str) -> bool {
        let id_match = match (self.fields.get("id"), key.trim().parse::<i64>()) {
            (Some(Value::Number(id)), Ok(wanted)) => id.as_i64() == Some(wanted),
            (Some(Value::String(id)), _) => id == key,
            _ => false,
        };
        id_match || self.str_field("slug") == Some(key)
    }

    pub fn children(&self, name: &str) -> &[ContentNode] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_mut(&mut self, name: &str) -> Option<&mut Vec<ContentNode>> {
        self.children.get_mut(name)
    }

    /// Replace a child collection, which must be one this kind declares.
    pub fn set_children(&mut self, name: &str, nodes: Vec<ContentNode>) -> Result<(), ContentError> {
        let (name, _) = self
            .kind
            .collection(name)
            .ok_or_else(|| ContentError::UnknownCollection {
                kind: self.kind,
                name: name.to_string(),
            })?;
        self.children.insert(name, nodes);
        Ok(())
    }

    /// Sort every child collection ascending by `ordering`, recursively.
    /// Nodes without an ordering keep their relative position at the end.
    pub fn sort_by_ordering(&mut self) {
        for nodes in self.children.values_mut() {
            nodes.sort_by_key(|n| match n.ordering() {
                Some(ordering) => (0, ordering),
                None => (1, 0),
            });
            for node in nodes.iter_mut() {
                node.sort_by_ordering();
            }
        }
    }
}
