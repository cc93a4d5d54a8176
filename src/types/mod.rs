pub mod error;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::sync::NodeFailure;

/// Sequence of node names from the root to a node
///
/// Provider-independent identity of a label; the root itself has no name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPath(Vec<String>);

impl LogicalPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn name(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` equals `other` or lies below it
    pub fn starts_with(&self, other: &LogicalPath) -> bool {
        self.0.starts_with(&other.0)
    }

    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }

    /// Routing key handed to the workflow engine, e.g. `GOOGLE_REVIEW_NEW_REVIEWS`
    pub fn flatten_key(&self) -> String {
        self.0
            .iter()
            .map(|segment| flatten_segment(segment))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

fn flatten_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut pending_sep = false;

    for c in segment.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_uppercase());
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }

    out
}

/// Identity used when comparing team members and suppliers across runs
pub fn identity_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Role tag assigned to a team member during setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    #[default]
    Manager,
    Sales,
    Service,
    Operations,
    Support,
}

/// A person whose mail gets its own label under the team category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub forwarding_enabled: bool,
    #[serde(default)]
    pub role: Role,
}

impl TeamMember {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            forwarding_enabled: false,
            role: Role::default(),
        }
    }
}

/// A vendor whose mail gets its own label under the supplier category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub name: String,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl Supplier {
    pub fn new<I, S>(name: impl Into<String>, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            domains: domains
                .into_iter()
                .filter_map(|d| normalize_domain(d.as_ref()))
                .collect(),
        }
    }

    /// Re-normalize domains, e.g. after deserializing user input
    pub fn normalized(self) -> Self {
        let domains = self.domains.iter().filter_map(|d| normalize_domain(d)).collect();
        Self {
            name: self.name.trim().to_string(),
            domains,
        }
    }
}

/// Lower-case a supplier domain and strip any `@` / mailbox prefix
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let domain = match trimmed.rfind('@') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    let domain = domain.trim().trim_end_matches('.').to_lowercase();

    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Team and supplier lists as applied by one provisioning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    #[serde(default)]
    pub team: Vec<TeamMember>,
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
}

/// Why a run did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Token expired; prompt re-authentication
    AuthExpired,
    /// Missing consent/scope; user action required
    PermissionDenied,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    pub requires_reauth: bool,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            requires_reauth: matches!(kind, RunErrorKind::AuthExpired),
        }
    }
}

/// Outcome of one provisioning run, returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub run_id: String,
    pub success: bool,
    pub provider: String,
    pub labels_created: usize,
    pub labels_reused: usize,
    pub skipped: usize,
    pub archived: Vec<String>,
    pub restored: Vec<String>,
    pub failures: Vec<NodeFailure>,
    pub error: Option<RunError>,
    /// Routing key -> provider id, active entries only
    pub label_map: BTreeMap<String, String>,
    /// Supplier domain -> routing key of the supplier's label
    pub supplier_domains: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_key() {
        let path = LogicalPath::new(["GOOGLE REVIEW", "New Reviews"]);
        assert_eq!(path.flatten_key(), "GOOGLE_REVIEW_NEW_REVIEWS");

        let path = LogicalPath::new(["BANKING", "e-Transfer"]);
        assert_eq!(path.flatten_key(), "BANKING_E_TRANSFER");

        let path = LogicalPath::new(["SUPPLIERS", "  Lennox & Sons "]);
        assert_eq!(path.flatten_key(), "SUPPLIERS_LENNOX_SONS");
    }

    #[test]
    fn test_path_navigation() {
        let path = LogicalPath::new(["MANAGER", "Hailey"]);
        assert_eq!(path.depth(), 2);
        assert_eq!(path.name(), Some("Hailey"));
        assert_eq!(path.parent(), Some(LogicalPath::new(["MANAGER"])));
        assert!(path.starts_with(&LogicalPath::new(["MANAGER"])));
        assert!(!LogicalPath::new(["MANAGERS"]).starts_with(&path));
        assert_eq!(LogicalPath::root().parent(), None);
        assert_eq!(path.to_string(), "MANAGER/Hailey");
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("@Lennox.com"), Some("lennox.com".to_string()));
        assert_eq!(normalize_domain(" orders@Carrier.COM "), Some("carrier.com".to_string()));
        assert_eq!(normalize_domain("trane.com."), Some("trane.com".to_string()));
        assert_eq!(normalize_domain("  @ "), None);
    }

    #[test]
    fn test_supplier_domains_deduplicated() {
        let supplier = Supplier::new("Lennox", ["@lennox.com", "LENNOX.COM", "lennoxpros.com"]);
        assert_eq!(supplier.domains.len(), 2);
    }

    #[test]
    fn test_team_member_deserializes_with_defaults() {
        let member: TeamMember = serde_json::from_str(r#"{"name": "Hailey"}"#).unwrap();
        assert_eq!(member.role, Role::Manager);
        assert!(!member.forwarding_enabled);
    }

    #[test]
    fn test_reauth_flag() {
        assert!(RunError::new(RunErrorKind::AuthExpired, "expired").requires_reauth);
        assert!(!RunError::new(RunErrorKind::PermissionDenied, "scope").requires_reauth);
    }
}
