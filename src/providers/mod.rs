//! Mailbox provider adapters
//!
//! Two remote models sit behind one trait:
//! - `gmail`: flat labels whose names encode the hierarchy with `/`
//! - `outlook`: Microsoft Graph mail folders with real parent/child ids
//!
//! The adapter is chosen once per session from the detected provider.

mod gmail;
mod http;
mod outlook;

pub use gmail::GmailLabels;
pub use outlook::OutlookFolders;

use async_trait::async_trait;
use label_templates::ColorSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::error::{CapabilityViolation, ProviderError, TaxonomyError};
use crate::types::{identity_key, LogicalPath};

/// Provider variants the sync engine can materialize labels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gmail" | "google" => Some(Self::Gmail),
            "outlook" | "microsoft" | "office365" => Some(Self::Outlook),
            _ => None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Gmail => Capabilities::gmail(),
            Self::Outlook => Capabilities::outlook(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the provider represents nesting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyModel {
    /// Single name string joined by the path separator
    FlatEncoded,
    /// Parent/child relationship by id
    FolderTree,
}

/// What a provider can represent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_color: bool,
    pub hierarchy: HierarchyModel,
    pub max_depth: Option<usize>,
    /// Limit on a single name (folder tree) or the encoded full name (flat)
    pub max_name_len: usize,
    pub path_separator: char,
    /// Names owned by the provider, compared case-insensitively
    pub reserved_names: &'static [&'static str],
    pub case_sensitive: bool,
}

const GMAIL_RESERVED: &[&str] = &[
    "inbox", "spam", "trash", "unread", "starred", "important", "sent", "draft", "drafts",
    "chat", "chats", "all mail", "snoozed", "scheduled",
];

const OUTLOOK_RESERVED: &[&str] = &[
    "inbox",
    "drafts",
    "sent items",
    "sent",
    "deleted items",
    "junk email",
    "outbox",
    "archive",
    "conversation history",
    "sync issues",
    "clutter",
];

impl Capabilities {
    pub fn gmail() -> Self {
        Self {
            supports_color: true,
            hierarchy: HierarchyModel::FlatEncoded,
            max_depth: None,
            max_name_len: 225,
            path_separator: '/',
            reserved_names: GMAIL_RESERVED,
            case_sensitive: false,
        }
    }

    pub fn outlook() -> Self {
        Self {
            supports_color: false,
            hierarchy: HierarchyModel::FolderTree,
            max_depth: Some(10),
            max_name_len: 255,
            path_separator: '/',
            reserved_names: OUTLOOK_RESERVED,
            case_sensitive: true,
        }
    }

    /// Reject a node the provider cannot hold at `path`
    ///
    /// Names are never truncated or rewritten.
    pub fn check_node(&self, path: &LogicalPath) -> Result<(), CapabilityViolation> {
        let name = path.name().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(CapabilityViolation::EmptyName);
        }

        let lowered = name.to_lowercase();
        if self.reserved_names.iter().any(|r| *r == lowered) {
            return Err(CapabilityViolation::ReservedName {
                name: name.to_string(),
            });
        }

        if let Some(max_depth) = self.max_depth {
            if path.depth() > max_depth {
                return Err(CapabilityViolation::DepthExceeded {
                    name: name.to_string(),
                    depth: path.depth(),
                    max_depth,
                });
            }
        }

        match self.hierarchy {
            HierarchyModel::FlatEncoded => {
                if name.contains(self.path_separator) {
                    return Err(CapabilityViolation::IllegalSeparator {
                        name: name.to_string(),
                        separator: self.path_separator,
                    });
                }
                if self.encode_path(path).chars().count() > self.max_name_len {
                    return Err(CapabilityViolation::NameTooLong {
                        name: name.to_string(),
                        max_len: self.max_name_len,
                    });
                }
            }
            HierarchyModel::FolderTree => {
                if name.chars().count() > self.max_name_len {
                    return Err(CapabilityViolation::NameTooLong {
                        name: name.to_string(),
                        max_len: self.max_name_len,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn names_equal(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a.trim() == b.trim()
        } else {
            identity_key(a) == identity_key(b)
        }
    }

    /// Full provider name for a path, e.g. `SUPPLIERS/Lennox`
    pub fn encode_path(&self, path: &LogicalPath) -> String {
        path.join(&self.path_separator.to_string())
    }

    pub fn decode_path(&self, encoded: &str) -> LogicalPath {
        LogicalPath::new(encoded.split(self.path_separator))
    }
}

/// A label or folder as seen on the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub id: String,
    pub path: LogicalPath,
}

impl RemoteNode {
    pub fn new(id: impl Into<String>, path: LogicalPath) -> Self {
        Self { id: id.into(), path }
    }
}

/// Uniform interface over the provider APIs
///
/// A `None` parent means the mailbox root.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> &Capabilities;

    async fn list_children(
        &self,
        parent: Option<&RemoteNode>,
    ) -> Result<Vec<RemoteNode>, ProviderError>;

    async fn create_node(
        &self,
        parent: Option<&RemoteNode>,
        name: &str,
        color: Option<&ColorSpec>,
    ) -> Result<RemoteNode, ProviderError>;

    /// Move `node` under `new_parent`, renaming it to `new_name`
    async fn move_node(
        &self,
        node: &RemoteNode,
        new_parent: Option<&RemoteNode>,
        new_name: &str,
    ) -> Result<RemoteNode, ProviderError>;

    async fn delete_node(&self, node: &RemoteNode) -> Result<(), ProviderError>;

    /// Messages currently filed under the node
    async fn message_count(&self, node: &RemoteNode) -> Result<u64, ProviderError>;
}

/// Path of a new child under an optional parent
pub(crate) fn child_path(parent: Option<&RemoteNode>, name: &str) -> LogicalPath {
    parent
        .map(|p| p.path.clone())
        .unwrap_or_else(LogicalPath::root)
        .child(name.trim())
}

/// Build the adapter for a provider with an access token from the OAuth flow
pub fn connect(
    kind: ProviderKind,
    access_token: &str,
) -> Result<Box<dyn MailboxProvider>, TaxonomyError> {
    if access_token.trim().is_empty() {
        return Err(TaxonomyError::AuthExpired(
            "No access token supplied".to_string(),
        ));
    }

    Ok(match kind {
        ProviderKind::Gmail => Box::new(GmailLabels::new(access_token)?),
        ProviderKind::Outlook => Box::new(OutlookFolders::new(access_token)?),
    })
}
