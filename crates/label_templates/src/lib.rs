//! Label template catalog
//!
//! Ships the base label taxonomy shared by every business vertical and the
//! per-vertical extensions that rename, add or extend its categories. The
//! data is embedded as JSON and parsed once on first access.

mod catalog;
mod intent;

pub use catalog::*;
pub use intent::IntentMatcher;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Color pair applied to a label on providers that support colors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorSpec {
    pub background: String,
    pub text: String,
}

/// Which dynamic list a placeholder category receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    /// One leaf per team member
    Team,
    /// One leaf per supplier
    Supplier,
}

/// A node as written in the template data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub name: String,
    #[serde(default)]
    pub color: Option<ColorSpec>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub placeholder: Option<PlaceholderKind>,
    #[serde(default)]
    pub children: Vec<TemplateNode>,
}

impl TemplateNode {
    /// Plain leaf with no decoration
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            intent: None,
            critical: false,
            placeholder: None,
            children: Vec::new(),
        }
    }
}

/// Per-vertical overrides applied on top of the base template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessExtension {
    /// Lookup key, e.g. "hvac"
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Top-level category renames (old name -> new name)
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Top-level categories dropped for this vertical
    #[serde(default)]
    pub removals: Vec<String>,
    /// New top-level categories, appended after the base ones
    #[serde(default)]
    pub additions: Vec<TemplateNode>,
    /// Extra children keyed by target category (post-rename name)
    #[serde(default)]
    pub subcategories: BTreeMap<String, Vec<TemplateNode>>,
    /// Category -> keywords used by the classifier
    #[serde(default)]
    pub intent_keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Unknown business type: {0}")]
    UnknownBusinessType(String),

    #[error("Invalid template data: {0}")]
    InvalidData(String),

    #[error("Invalid keyword pattern: {0}")]
    InvalidKeyword(#[from] regex::Error),
}
