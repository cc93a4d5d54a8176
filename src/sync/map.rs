//! Logical path -> provider id map for one user and provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::providers::{HierarchyModel, ProviderKind, RemoteNode};
use crate::types::{identity_key, LogicalPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Active,
    /// Moved under the archive category after removal from the team or supplier list
    Archived,
    /// Container outside the canonical tree, such as the archive category
    Holding,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Holding => "holding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "holding" => Some(Self::Holding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMapEntry {
    /// Canonical path the entry stands for
    pub path: LogicalPath,
    pub provider: ProviderKind,
    pub provider_id: String,
    /// Where the node currently lives remotely; differs from `path` once archived
    pub remote_path: LogicalPath,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
}

impl LabelMapEntry {
    pub fn remote_node(&self) -> RemoteNode {
        RemoteNode::new(self.provider_id.clone(), self.remote_path.clone())
    }
}

/// Identifier map keyed by canonical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    provider: ProviderKind,
    entries: BTreeMap<LogicalPath, LabelMapEntry>,
}

impl LabelMap {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(provider: ProviderKind, entries: impl IntoIterator<Item = LabelMapEntry>) -> Self {
        Self {
            provider,
            entries: entries
                .into_iter()
                .filter(|e| e.provider == provider)
                .map(|e| (e.path.clone(), e))
                .collect(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn get(&self, path: &LogicalPath) -> Option<&LabelMapEntry> {
        self.entries.get(path)
    }

    /// Provider id of an active entry
    pub fn id_for(&self, path: &LogicalPath) -> Option<&str> {
        self.entries
            .get(path)
            .filter(|e| e.state == EntryState::Active)
            .map(|e| e.provider_id.as_str())
    }

    /// Remote node for an active entry
    pub fn active_node(&self, path: &LogicalPath) -> Option<RemoteNode> {
        self.entries
            .get(path)
            .filter(|e| e.state == EntryState::Active)
            .map(LabelMapEntry::remote_node)
    }

    /// Remote node for an active or holding entry
    pub fn live_node(&self, path: &LogicalPath) -> Option<RemoteNode> {
        self.entries
            .get(path)
            .filter(|e| e.state != EntryState::Archived)
            .map(LabelMapEntry::remote_node)
    }

    /// Active sibling of `path` whose name differs only in case or spacing
    pub fn active_variant(&self, path: &LogicalPath) -> Option<&LabelMapEntry> {
        let parent = path.parent()?;
        let wanted = identity_key(path.name()?);
        self.entries.values().find(|e| {
            e.state == EntryState::Active
                && &e.path != path
                && e.path.parent().as_ref() == Some(&parent)
                && e.path.name().map_or(false, |n| identity_key(n) == wanted)
        })
    }

    /// Record a node the provider returned for `path`
    pub fn record(&mut self, path: LogicalPath, node: &RemoteNode) {
        self.put(path, node, EntryState::Active);
    }

    /// Record a container that is not part of the canonical tree
    pub fn hold(&mut self, path: LogicalPath, node: &RemoteNode) {
        self.put(path, node, EntryState::Holding);
    }

    fn put(&mut self, path: LogicalPath, node: &RemoteNode, state: EntryState) {
        let created_at = self
            .entries
            .get(&path)
            .map(|e| e.created_at)
            .unwrap_or_else(Utc::now);

        let entry = LabelMapEntry {
            path: path.clone(),
            provider: self.provider,
            provider_id: node.id.clone(),
            remote_path: node.path.clone(),
            state,
            created_at,
        };
        self.entries.insert(path, entry);
    }

    /// Move the entry at `from` and everything below it to `to`
    ///
    /// `node` is where the entry now lives remotely. In a folder tree the
    /// descendants move with it; flat labels keep their own names.
    pub fn rekey(&mut self, from: &LogicalPath, to: &LogicalPath, node: &RemoteNode) {
        let Some(old_remote) = self.entries.get(from).map(|e| e.remote_path.clone()) else {
            return;
        };
        let nested = self.provider.capabilities().hierarchy == HierarchyModel::FolderTree;

        for mut entry in self.remove_subtree(from) {
            if &entry.path == from {
                entry.provider_id = node.id.clone();
                entry.remote_path = node.path.clone();
            } else if nested && entry.remote_path.starts_with(&old_remote) {
                entry.remote_path = replace_prefix(&entry.remote_path, &old_remote, &node.path);
            }
            entry.path = replace_prefix(&entry.path, from, to);
            self.insert(entry);
        }
    }

    pub fn insert(&mut self, entry: LabelMapEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn remove(&mut self, path: &LogicalPath) -> Option<LabelMapEntry> {
        self.entries.remove(path)
    }

    /// Drop `path` and every entry below it
    pub fn remove_subtree(&mut self, path: &LogicalPath) -> Vec<LabelMapEntry> {
        let doomed: Vec<LogicalPath> = self
            .entries
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();

        doomed
            .iter()
            .filter_map(|p| self.entries.remove(p))
            .collect()
    }

    /// Mark an entry archived after its node moved to `node`
    pub fn archive(&mut self, path: &LogicalPath, node: &RemoteNode) -> bool {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.provider_id = node.id.clone();
                entry.remote_path = node.path.clone();
                entry.state = EntryState::Archived;
                true
            }
            None => false,
        }
    }

    /// Archived entry for a member or supplier path, if any
    pub fn archived(&self, path: &LogicalPath) -> Option<&LabelMapEntry> {
        self.entries
            .get(path)
            .filter(|e| e.state == EntryState::Archived)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LabelMapEntry> {
        self.entries.values()
    }

    /// Direct children of `parent` in the given state
    pub fn children(&self, parent: &LogicalPath, state: EntryState) -> Vec<&LabelMapEntry> {
        self.entries
            .values()
            .filter(|e| e.state == state)
            .filter(|e| e.path.parent().as_ref() == Some(parent))
            .collect()
    }

    /// Routing key -> provider id, for the workflow engine
    ///
    /// When two active paths flatten to the same key, the first path in
    /// order keeps it; see `key_collisions`.
    pub fn routing_map(&self) -> BTreeMap<String, String> {
        let mut routes = BTreeMap::new();
        for entry in self.active_entries() {
            let key = entry.path.flatten_key();
            if routes.contains_key(&key) {
                warn!("{} flattens to taken routing key {}; not routed", entry.path, key);
                continue;
            }
            routes.insert(key, entry.provider_id.clone());
        }
        routes
    }

    /// Routing keys claimed by more than one active path
    pub fn key_collisions(&self) -> BTreeMap<String, Vec<LogicalPath>> {
        let mut claims: BTreeMap<String, Vec<LogicalPath>> = BTreeMap::new();
        for entry in self.active_entries() {
            claims
                .entry(entry.path.flatten_key())
                .or_default()
                .push(entry.path.clone());
        }
        claims.retain(|_, paths| paths.len() > 1);
        claims
    }

    fn active_entries(&self) -> impl Iterator<Item = &LabelMapEntry> {
        self.entries
            .values()
            .filter(|e| e.state == EntryState::Active)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn replace_prefix(path: &LogicalPath, from: &LogicalPath, to: &LogicalPath) -> LogicalPath {
    LogicalPath::new(
        to.segments()
            .iter()
            .chain(&path.segments()[from.depth()..])
            .cloned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, path: &LogicalPath) -> RemoteNode {
        RemoteNode::new(id, path.clone())
    }

    #[test]
    fn test_record_keeps_creation_time() {
        let mut map = LabelMap::new(ProviderKind::Gmail);
        let path = LogicalPath::new(["BANKING"]);

        map.record(path.clone(), &node("Label_1", &path));
        let first = map.get(&path).unwrap().created_at;

        map.record(path.clone(), &node("Label_9", &path));
        let entry = map.get(&path).unwrap();
        assert_eq!(entry.created_at, first);
        assert_eq!(entry.provider_id, "Label_9");
    }

    #[test]
    fn test_archived_entry_leaves_routing_map() {
        let mut map = LabelMap::new(ProviderKind::Outlook);
        let path = LogicalPath::new(["MANAGER", "Aaron"]);
        let archived_at = LogicalPath::new(["ARCHIVED", "MANAGER", "Aaron"]);

        map.record(path.clone(), &node("f1", &path));
        assert!(map.archive(&path, &node("f1", &archived_at)));
        assert_eq!(map.id_for(&path), None);
        assert!(map.archived(&path).is_some());
        assert!(map.routing_map().is_empty());
        assert_eq!(map.get(&path).unwrap().remote_path, archived_at);
    }

    #[test]
    fn test_remove_subtree() {
        let mut map = LabelMap::new(ProviderKind::Gmail);
        for p in [
            LogicalPath::new(["SUPPLIERS"]),
            LogicalPath::new(["SUPPLIERS", "Lennox"]),
            LogicalPath::new(["SUPPLIERS", "Trane"]),
            LogicalPath::new(["SUPPORT"]),
        ] {
            map.record(p.clone(), &node("x", &p));
        }

        let removed = map.remove_subtree(&LogicalPath::new(["SUPPLIERS"]));
        assert_eq!(removed.len(), 3);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_routing_map_uses_flattened_keys() {
        let mut map = LabelMap::new(ProviderKind::Gmail);
        let path = LogicalPath::new(["GOOGLE REVIEW", "New Reviews"]);
        map.record(path.clone(), &node("Label_7", &path));

        let routing = map.routing_map();
        assert_eq!(routing.get("GOOGLE_REVIEW_NEW_REVIEWS").map(String::as_str), Some("Label_7"));
    }

    #[test]
    fn test_from_entries_filters_other_provider() {
        let path = LogicalPath::new(["BANKING"]);
        let entry = LabelMapEntry {
            path: path.clone(),
            provider: ProviderKind::Outlook,
            provider_id: "f1".into(),
            remote_path: path,
            state: EntryState::Active,
            created_at: Utc::now(),
        };

        let map = LabelMap::from_entries(ProviderKind::Gmail, [entry]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_holding_entries_not_routed() {
        let mut map = LabelMap::new(ProviderKind::Gmail);
        let archive = LogicalPath::new(["ARCHIVED"]);
        map.hold(archive.clone(), &node("Label_1", &archive));

        assert!(map.routing_map().is_empty());
        assert_eq!(map.id_for(&archive), None);
        assert_eq!(map.live_node(&archive).map(|n| n.id), Some("Label_1".to_string()));
    }

    #[test]
    fn test_active_variant_matches_by_identity() {
        let mut map = LabelMap::new(ProviderKind::Outlook);
        let lower = LogicalPath::new(["MANAGER", "hailey"]);
        map.record(lower.clone(), &node("f1", &lower));

        let upper = LogicalPath::new(["MANAGER", "Hailey"]);
        assert_eq!(map.active_variant(&upper).map(|e| &e.path), Some(&lower));
        assert!(map.active_variant(&lower).is_none());
        assert!(map
            .active_variant(&LogicalPath::new(["SUPPLIERS", "Hailey"]))
            .is_none());
    }

    #[test]
    fn test_rekey_moves_subtree() {
        let mut map = LabelMap::new(ProviderKind::Outlook);
        let old = LogicalPath::new(["SUPPLIERS", "lennox"]);
        let child = old.child("Orders");
        map.record(old.clone(), &node("f1", &old));
        map.record(child.clone(), &node("f2", &child));

        let new = LogicalPath::new(["SUPPLIERS", "Lennox"]);
        map.rekey(&old, &new, &node("f1", &new));

        assert!(map.get(&old).is_none());
        assert_eq!(map.id_for(&new), Some("f1"));
        let moved = map.get(&new.child("Orders")).unwrap();
        assert_eq!(moved.provider_id, "f2");
        assert_eq!(moved.remote_path, new.child("Orders"));
    }

    #[test]
    fn test_routing_key_collision_not_overwritten() {
        let mut map = LabelMap::new(ProviderKind::Outlook);
        let first = LogicalPath::new(["MANAGER", "Hailey"]);
        let second = LogicalPath::new(["MANAGER", "hailey"]);
        map.record(first.clone(), &node("f1", &first));
        map.record(second.clone(), &node("f2", &second));

        assert_eq!(map.routing_map().get("MANAGER_HAILEY").map(String::as_str), Some("f1"));
        let collisions = map.key_collisions();
        assert_eq!(collisions.get("MANAGER_HAILEY"), Some(&vec![first, second]));
    }
}
