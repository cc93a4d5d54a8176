//! Canonical label tree
//!
//! The tree is rebuilt on every run from the bundled templates plus the
//! caller's team and supplier lists. It never holds provider ids; those live
//! in the identifier map.

mod composer;

pub use composer::{compose, compose_for_business, CompositionError};

use label_templates::{ColorSpec, IntentMatcher, PlaceholderKind, TemplateError, TemplateNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{identity_key, LogicalPath};

/// One label in the canonical tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    pub color: Option<ColorSpec>,
    /// Semantic tag consumed by the classifier, e.g. `ai.financial_transaction`
    pub intent: Option<String>,
    pub critical: bool,
    /// Set on categories that receive team or supplier leaves
    pub placeholder: Option<PlaceholderKind>,
    /// Classifier keywords from the business extension
    pub keywords: Vec<String>,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            intent: None,
            critical: false,
            placeholder: None,
            keywords: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including self
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(SchemaNode::subtree_size).sum::<usize>()
    }

    pub fn has_child(&self, name: &str) -> bool {
        let wanted = identity_key(name);
        self.children.iter().any(|c| identity_key(&c.name) == wanted)
    }
}

impl From<&TemplateNode> for SchemaNode {
    fn from(node: &TemplateNode) -> Self {
        Self {
            name: node.name.trim().to_string(),
            color: node.color.clone(),
            intent: node.intent.clone(),
            critical: node.critical,
            placeholder: node.placeholder,
            keywords: Vec::new(),
            children: node.children.iter().map(SchemaNode::from).collect(),
        }
    }
}

/// Fully composed taxonomy for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTree {
    /// Business extension the tree was built from
    pub business_key: String,
    /// Top-level categories in display order
    pub roots: Vec<SchemaNode>,
}

impl CanonicalTree {
    /// Nodes in depth-first pre-order with their logical paths
    pub fn preorder(&self) -> Vec<(LogicalPath, &SchemaNode)> {
        fn walk<'a>(
            node: &'a SchemaNode,
            path: LogicalPath,
            out: &mut Vec<(LogicalPath, &'a SchemaNode)>,
        ) {
            for child in &node.children {
                let child_path = path.child(&child.name);
                out.push((child_path.clone(), child));
                walk(child, child_path, out);
            }
        }

        let mut out = Vec::new();
        for root in &self.roots {
            let path = LogicalPath::root().child(&root.name);
            out.push((path.clone(), root));
            walk(root, path, &mut out);
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(SchemaNode::subtree_size).sum()
    }

    /// Find a node by path, comparing names case-insensitively
    pub fn find(&self, path: &LogicalPath) -> Option<&SchemaNode> {
        let mut segments = path.segments().iter();
        let first = segments.next()?;
        let mut node = self
            .roots
            .iter()
            .find(|n| identity_key(&n.name) == identity_key(first))?;

        for segment in segments {
            node = node
                .children
                .iter()
                .find(|n| identity_key(&n.name) == identity_key(segment))?;
        }
        Some(node)
    }

    pub fn contains_path(&self, path: &LogicalPath) -> bool {
        self.find(path).is_some()
    }

    /// Path of the first category receiving the given dynamic list
    pub fn placeholder_path(&self, kind: PlaceholderKind) -> Option<LogicalPath> {
        self.preorder()
            .into_iter()
            .find(|(_, node)| node.placeholder == Some(kind))
            .map(|(path, _)| path)
    }

    /// Routing keys of every node, in pre-order
    pub fn flattened_keys(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .map(|(path, _)| path.flatten_key())
            .collect()
    }

    /// Classifier over the keyword dictionaries carried by top-level nodes
    pub fn intent_matcher(&self) -> Result<IntentMatcher, TemplateError> {
        let dictionary: BTreeMap<String, Vec<String>> = self
            .roots
            .iter()
            .filter(|n| !n.keywords.is_empty())
            .map(|n| (n.name.clone(), n.keywords.clone()))
            .collect();
        IntentMatcher::new(&dictionary)
    }
}
