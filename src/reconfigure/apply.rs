use chrono::Utc;
use label_templates::PlaceholderKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::diff::ReconfigurationDiff;
use super::RemovalPolicy;
use crate::providers::{MailboxProvider, RemoteNode};
use crate::schema::CanonicalTree;
use crate::sync::{ensure_path, EntryState, LabelMap, LabelMapEntry, NodeFailure, RetryPolicy};
use crate::types::error::ProviderError;
use crate::types::{identity_key, LogicalPath};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconfigureOutcome {
    pub archived: Vec<LogicalPath>,
    pub deleted: Vec<LogicalPath>,
    pub restored: Vec<LogicalPath>,
    pub failures: Vec<NodeFailure>,
    /// Removals and re-additions not attempted because the run was cancelled
    pub skipped: Vec<LogicalPath>,
    pub fatal: Option<ProviderError>,
    pub cancelled: bool,
}

impl ReconfigureOutcome {
    fn record_error(&mut self, path: LogicalPath, err: ProviderError) {
        if err.is_fatal_for_run() {
            warn!("Stopping reconfiguration at {}: {}", path, err);
            self.fatal.get_or_insert(err);
        } else {
            warn!("Could not reconfigure {}: {}", path, err);
            self.failures.push(NodeFailure {
                path,
                error: err,
                affected: 1,
            });
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fatal.is_none() && !self.cancelled && self.failures.is_empty()
    }

    /// Whether reconciliation should still run after this outcome
    pub fn should_continue(&self) -> bool {
        self.fatal.is_none() && !self.cancelled
    }
}

enum Disposal {
    Archived,
    Deleted,
}

/// Applies membership removals and re-additions to an existing mailbox
///
/// Runs before reconciliation so that the map the engine sees already
/// reflects archived and restored entries.
pub struct Reconfigurator<'a> {
    adapter: &'a dyn MailboxProvider,
    retry: &'a RetryPolicy,
    archive_label: String,
    policy: RemovalPolicy,
    cancel: Arc<AtomicBool>,
}

impl<'a> Reconfigurator<'a> {
    pub fn new(
        adapter: &'a dyn MailboxProvider,
        retry: &'a RetryPolicy,
        archive_label: impl Into<String>,
        policy: RemovalPolicy,
    ) -> Self {
        Self {
            adapter,
            retry,
            archive_label: archive_label.into(),
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop between items once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub async fn apply(
        &self,
        diff: &ReconfigurationDiff,
        tree: &CanonicalTree,
        map: &mut LabelMap,
    ) -> ReconfigureOutcome {
        let mut outcome = ReconfigureOutcome::default();
        if diff.is_empty() {
            return outcome;
        }

        let removals = targets(tree, PlaceholderKind::Team, diff.removed_members.iter().map(|m| &m.name))
            .chain(targets(
                tree,
                PlaceholderKind::Supplier,
                diff.removed_suppliers.iter().map(|s| &s.name),
            ));
        let additions = targets(tree, PlaceholderKind::Team, diff.added_members.iter().map(|m| &m.name))
            .chain(targets(
                tree,
                PlaceholderKind::Supplier,
                diff.added_suppliers.iter().map(|s| &s.name),
            ));

        for (placeholder, name) in removals.collect::<Vec<_>>() {
            if self.stop(&placeholder, name, &mut outcome) {
                continue;
            }
            self.remove_one(&placeholder, name, tree, map, &mut outcome).await;
        }

        for (placeholder, name) in additions.collect::<Vec<_>>() {
            if self.stop(&placeholder, name, &mut outcome) {
                continue;
            }
            self.restore_one(&placeholder, name, tree, map, &mut outcome).await;
        }

        info!(
            "Reconfiguration applied: {} archived, {} deleted, {} restored, {} failed, {} skipped",
            outcome.archived.len(),
            outcome.deleted.len(),
            outcome.restored.len(),
            outcome.failures.len(),
            outcome.skipped.len()
        );
        outcome
    }

    /// True once the run is halted; cancelled items are reported as skipped
    fn stop(&self, placeholder: &LogicalPath, name: &str, outcome: &mut ReconfigureOutcome) -> bool {
        if outcome.fatal.is_some() {
            return true;
        }
        if self.cancel.load(Ordering::SeqCst) {
            if !outcome.cancelled {
                info!("Reconfiguration cancelled");
                outcome.cancelled = true;
            }
            outcome.skipped.push(placeholder.child(name.trim()));
            return true;
        }
        false
    }

    async fn remove_one(
        &self,
        placeholder: &LogicalPath,
        name: &str,
        tree: &CanonicalTree,
        map: &mut LabelMap,
        outcome: &mut ReconfigureOutcome,
    ) {
        let Some(entry) = find_child(map, placeholder, name, EntryState::Active).cloned() else {
            debug!("No active label for removed '{}' under {}", name, placeholder);
            return;
        };

        // Static template children (e.g. a bundled supplier) stay
        if tree.contains_path(&entry.path) {
            debug!("{} is still part of the taxonomy; keeping it", entry.path);
            return;
        }

        let result = match self.policy {
            RemovalPolicy::Archive => self.archive(&entry, map).await.map(|_| Disposal::Archived),
            RemovalPolicy::DeleteIfEmpty => self.delete_if_empty(&entry, map).await,
        };

        match result {
            Ok(Disposal::Archived) => {
                info!("Archived {}", entry.path);
                outcome.archived.push(entry.path);
            }
            Ok(Disposal::Deleted) => {
                info!("Deleted empty {}", entry.path);
                outcome.deleted.push(entry.path);
            }
            Err(ProviderError::NotFound(_)) => {
                info!("{} no longer exists remotely; dropping it", entry.path);
                map.remove(&entry.path);
                outcome.deleted.push(entry.path);
            }
            Err(err) => outcome.record_error(entry.path, err),
        }
    }

    async fn archive(&self, entry: &LabelMapEntry, map: &mut LabelMap) -> Result<(), ProviderError> {
        let holding = LogicalPath::new(
            std::iter::once(self.archive_label.clone()).chain(
                entry
                    .path
                    .parent()
                    .unwrap_or_default()
                    .segments()
                    .iter()
                    .cloned(),
            ),
        );
        let parent = ensure_path(self.adapter, map, &holding, self.retry).await?;

        let name = entry.path.name().unwrap_or_default();
        let node = entry.remote_node();
        let moved = match self.move_to(&node, &parent, name).await {
            // An earlier archived copy holds the name
            Err(ProviderError::Conflict(_)) => {
                let dated = format!("{} ({})", name, Utc::now().format("%Y-%m-%d"));
                self.move_to(&node, &parent, &dated).await?
            }
            other => other?,
        };

        map.archive(&entry.path, &moved);
        Ok(())
    }

    async fn delete_if_empty(
        &self,
        entry: &LabelMapEntry,
        map: &mut LabelMap,
    ) -> Result<Disposal, ProviderError> {
        let node = entry.remote_node();
        let count = self
            .retry
            .run(&format!("count messages in {}", entry.path), || {
                self.adapter.message_count(&node)
            })
            .await?;

        if count > 0 {
            info!("{} still holds {} messages; archiving instead", entry.path, count);
            return self.archive(entry, map).await.map(|_| Disposal::Archived);
        }

        self.retry
            .run(&format!("delete {}", entry.path), || self.adapter.delete_node(&node))
            .await?;
        map.remove(&entry.path);
        Ok(Disposal::Deleted)
    }

    async fn restore_one(
        &self,
        placeholder: &LogicalPath,
        name: &str,
        tree: &CanonicalTree,
        map: &mut LabelMap,
        outcome: &mut ReconfigureOutcome,
    ) {
        let Some(entry) = find_child(map, placeholder, name, EntryState::Archived).cloned() else {
            return;
        };
        let Some(parent) = map.active_node(placeholder) else {
            debug!("{} is not mapped yet; cannot restore '{}'", placeholder, name);
            return;
        };

        let target_name = tree
            .find(&placeholder.child(name.trim()))
            .map(|n| n.name.clone())
            .unwrap_or_else(|| name.trim().to_string());
        let path = placeholder.child(&target_name);

        match self.move_to(&entry.remote_node(), &parent, &target_name).await {
            Ok(moved) => {
                info!("Restored {} from {}", path, entry.remote_path);
                map.remove(&entry.path);
                map.insert(LabelMapEntry {
                    path: path.clone(),
                    provider_id: moved.id,
                    remote_path: moved.path,
                    state: EntryState::Active,
                    ..entry
                });
                outcome.restored.push(path);
            }
            Err(ProviderError::NotFound(_)) => {
                info!("Archived copy of {} is gone; it will be recreated", path);
                map.remove(&entry.path);
            }
            Err(ProviderError::Conflict(_)) => {
                warn!("{} already exists; leaving the archived copy in place", path);
            }
            Err(err) => outcome.record_error(path, err),
        }
    }

    async fn move_to(
        &self,
        node: &RemoteNode,
        parent: &RemoteNode,
        name: &str,
    ) -> Result<RemoteNode, ProviderError> {
        self.retry
            .run(&format!("move {} to {}", node.path, parent.path), || {
                self.adapter.move_node(node, Some(parent), name)
            })
            .await
    }
}

/// Placeholder path paired with each name, for kinds present in the tree
fn targets<'n>(
    tree: &CanonicalTree,
    kind: PlaceholderKind,
    names: impl Iterator<Item = &'n String>,
) -> impl Iterator<Item = (LogicalPath, &'n str)> {
    let placeholder = tree.placeholder_path(kind);
    if placeholder.is_none() {
        warn!("Taxonomy '{}' has no {:?} category", tree.business_key, kind);
    }

    names.filter_map(move |name| placeholder.clone().map(|p| (p, name.as_str())))
}

fn find_child<'m>(
    map: &'m LabelMap,
    parent: &LogicalPath,
    name: &str,
    state: EntryState,
) -> Option<&'m LabelMapEntry> {
    let wanted = identity_key(name);
    map.children(parent, state)
        .into_iter()
        .find(|e| e.path.name().map_or(false, |n| identity_key(n) == wanted))
}
