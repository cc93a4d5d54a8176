//! Reconciliation engine
//!
//! Materializes a canonical tree in a mailbox, creating only what the
//! identifier map does not already hold. The walk is depth-first pre-order:
//! a node's id is recorded before its children are visited, so a run that
//! stops partway never creates the same path twice on the next run.
//!
//! Siblings are visited concurrently; adapter calls are bounded by a
//! semaphore. A failed node takes its subtree with it but never its
//! siblings. Auth and permission errors stop the whole run.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use label_templates::ColorSpec;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::map::LabelMap;
use super::retry::RetryPolicy;
use crate::providers::{MailboxProvider, ProviderKind, RemoteNode};
use crate::schema::{CanonicalTree, SchemaNode};
use crate::store::{label_map as map_store, DbPool};
use crate::types::error::ProviderError;
use crate::types::LogicalPath;

/// Progress reported while a run is in flight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    NodeCreated { path: LogicalPath, provider_id: String },
    NodeReused { path: LogicalPath, provider_id: String },
    NodeFailed { path: LogicalPath, error: ProviderError, affected: usize },
    Completed { created: usize, reused: usize, skipped: usize, cancelled: bool },
}

/// A subtree that could not be materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub path: LogicalPath,
    pub error: ProviderError,
    /// Nodes left unmaterialized: the failed node and all its descendants
    pub affected: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub map: LabelMap,
    pub created: Vec<LogicalPath>,
    pub reused: Vec<LogicalPath>,
    pub failures: Vec<NodeFailure>,
    /// Nodes never attempted because the run stopped early
    pub skipped: Vec<LogicalPath>,
    /// Auth or permission error that stopped the run
    pub fatal: Option<ProviderError>,
    pub cancelled: bool,
}

impl ReconcileOutcome {
    /// Nodes of the tree that have no provider id after this run
    pub fn skipped_count(&self) -> usize {
        self.skipped.len() + self.failures.iter().map(|f| f.affected).sum::<usize>()
    }

    pub fn is_complete(&self) -> bool {
        self.fatal.is_none() && !self.cancelled && self.failures.is_empty()
    }
}

/// Writes each new entry through to SQLite as soon as it is recorded
#[derive(Clone)]
pub struct MapPersistence {
    pub pool: DbPool,
    pub user_id: String,
}

pub struct SyncEngine {
    max_concurrency: usize,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
    events: Option<flume::Sender<SyncEvent>>,
    persistence: Option<MapPersistence>,
}

impl SyncEngine {
    pub fn new(max_concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            retry,
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
            persistence: None,
        }
    }

    pub fn with_events(mut self, sender: flume::Sender<SyncEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_persistence(mut self, persistence: MapPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Share a cancellation flag with the caller
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Stop the run at the next node boundary
    pub fn cancel(&self) {
        info!("Cancelling reconciliation");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Bring the mailbox in line with `tree`, returning the updated map
    pub async fn reconcile(
        &self,
        tree: &CanonicalTree,
        map: LabelMap,
        adapter: &dyn MailboxProvider,
    ) -> ReconcileOutcome {
        let map = if map.provider() == adapter.kind() {
            map
        } else {
            warn!(
                "Identifier map belongs to {}, adapter is {}; starting from an empty map",
                map.provider(),
                adapter.kind()
            );
            LabelMap::new(adapter.kind())
        };

        info!(
            "Reconciling {} nodes for '{}' on {} ({} already mapped)",
            tree.node_count(),
            tree.business_key,
            adapter.kind(),
            map.len()
        );

        let run = Run {
            engine: self,
            adapter,
            permits: Semaphore::new(self.max_concurrency),
            halted: AtomicBool::new(false),
            map: Mutex::new(map),
            report: Mutex::new(Report::default()),
        };

        let roots = tree
            .roots
            .iter()
            .map(|root| run.visit(root, LogicalPath::root().child(&root.name), None));
        join_all(roots).await;

        let outcome = run.finish();
        info!(
            "Reconciliation finished: {} created, {} reused, {} skipped, {} failed subtrees",
            outcome.created.len(),
            outcome.reused.len(),
            outcome.skipped_count(),
            outcome.failures.len()
        );
        self.emit(SyncEvent::Completed {
            created: outcome.created.len(),
            reused: outcome.reused.len(),
            skipped: outcome.skipped_count(),
            cancelled: outcome.cancelled,
        });
        outcome
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        if let Some(sender) = &self.events {
            if let Err(e) = sender.send(event) {
                debug!("Dropping sync event, receiver gone: {}", e);
            }
        }
    }

    pub(crate) fn forget(&self, provider: ProviderKind, path: &LogicalPath) {
        let Some(p) = &self.persistence else {
            return;
        };
        if let Err(e) = map_store::delete_entry(&p.pool, &p.user_id, provider, path) {
            warn!("Failed to drop map entry for {}: {}", path, e);
        }
    }

    pub(crate) fn persist(&self, map: &LabelMap, path: &LogicalPath) {
        let (Some(p), Some(entry)) = (&self.persistence, map.get(path)) else {
            return;
        };
        if let Err(e) = map_store::save_entry(&p.pool, &p.user_id, entry) {
            warn!("Failed to persist map entry for {}: {}", path, e);
        }
    }
}

#[derive(Default)]
struct Report {
    created: Vec<LogicalPath>,
    reused: Vec<LogicalPath>,
    failures: Vec<NodeFailure>,
    skipped: Vec<LogicalPath>,
    fatal: Option<ProviderError>,
}

/// A resolved parent, shared by its children
///
/// The node sits behind an async mutex so that when several children find
/// the parent gone, only one of them recreates it.
struct ParentSlot {
    path: LogicalPath,
    color: Option<ColorSpec>,
    node: tokio::sync::Mutex<RemoteNode>,
    parent: Option<Arc<ParentSlot>>,
}

struct Run<'a> {
    engine: &'a SyncEngine,
    adapter: &'a dyn MailboxProvider,
    permits: Semaphore,
    halted: AtomicBool,
    map: Mutex<LabelMap>,
    report: Mutex<Report>,
}

impl<'a> Run<'a> {
    fn visit<'s>(
        &'s self,
        node: &'s SchemaNode,
        path: LogicalPath,
        parent: Option<Arc<ParentSlot>>,
    ) -> BoxFuture<'s, ()> {
        async move {
            if self.should_stop() {
                self.skip_subtree(node, &path);
                return;
            }

            let resolved = match self.resolve(node, &path, parent.as_deref()).await {
                Ok(remote) => remote,
                Err(err) => {
                    self.fail(node, &path, err);
                    return;
                }
            };

            if node.children.is_empty() {
                return;
            }

            let slot = Arc::new(ParentSlot {
                path: path.clone(),
                color: node.color.clone(),
                node: tokio::sync::Mutex::new(resolved),
                parent,
            });

            let children = node
                .children
                .iter()
                .map(|child| self.visit(child, path.child(&child.name), Some(slot.clone())));
            join_all(children).await;
        }
        .boxed()
    }

    async fn resolve(
        &self,
        node: &SchemaNode,
        path: &LogicalPath,
        parent: Option<&ParentSlot>,
    ) -> Result<RemoteNode, ProviderError> {
        if let Some(existing) = self.lock_map().active_node(path) {
            debug!("Reusing {} ({})", path, existing.id);
            self.engine.emit(SyncEvent::NodeReused {
                path: path.clone(),
                provider_id: existing.id.clone(),
            });
            self.lock_report().reused.push(path.clone());
            return Ok(existing);
        }

        let parent_node = match parent {
            Some(slot) => Some(slot.node.lock().await.clone()),
            None => None,
        };

        if let Some(renamed) = self.rename_variant(path, parent_node.as_ref()).await? {
            return Ok(renamed);
        }

        let attempt = self
            .create_or_adopt(parent_node.as_ref(), &node.name, node.color.as_ref())
            .await;

        let (remote, created) = match (attempt, parent) {
            (Err(ProviderError::NotFound(msg)), Some(slot)) => {
                warn!("Parent of {} vanished remotely ({}); recreating", path, msg);
                let fresh = self.recreate_parent(slot, parent_node.as_ref()).await?;
                self.create_or_adopt(Some(&fresh), &node.name, node.color.as_ref())
                    .await?
            }
            (attempt, _) => attempt?,
        };

        self.record(path, &remote);

        let mut report = self.lock_report();
        if created {
            debug!("Created {} ({})", path, remote.id);
            self.engine.emit(SyncEvent::NodeCreated {
                path: path.clone(),
                provider_id: remote.id.clone(),
            });
            report.created.push(path.clone());
        } else {
            debug!("Adopted existing {} ({})", path, remote.id);
            self.engine.emit(SyncEvent::NodeReused {
                path: path.clone(),
                provider_id: remote.id.clone(),
            });
            report.reused.push(path.clone());
        }

        Ok(remote)
    }

    /// Rename a mapped sibling that differs from `path` only in case or spacing
    ///
    /// Keeps a renamed team member or supplier on its existing node instead
    /// of creating a second one next to it.
    async fn rename_variant(
        &self,
        path: &LogicalPath,
        parent: Option<&RemoteNode>,
    ) -> Result<Option<RemoteNode>, ProviderError> {
        let Some(variant) = self.lock_map().active_variant(path).cloned() else {
            return Ok(None);
        };
        let name = path.name().unwrap_or_default();
        let current = variant.remote_node();

        let renamed = match self
            .call(&format!("rename '{}'", variant.path), || {
                self.adapter.move_node(&current, parent, name)
            })
            .await
        {
            Ok(renamed) => renamed,
            Err(ProviderError::NotFound(_)) => {
                info!("{} no longer exists remotely; creating {}", variant.path, path);
                let mut map = self.lock_map();
                for gone in map.remove_subtree(&variant.path) {
                    self.engine.forget(map.provider(), &gone.path);
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        info!("Renamed {} to {}", variant.path, path);
        {
            let mut map = self.lock_map();
            let moved: Vec<LogicalPath> = map
                .entries()
                .filter(|e| e.path.starts_with(&variant.path))
                .map(|e| e.path.clone())
                .collect();
            map.rekey(&variant.path, path, &renamed);
            for old in &moved {
                self.engine.forget(map.provider(), old);
            }
            for entry in map.entries().filter(|e| e.path.starts_with(path)) {
                self.engine.persist(&map, &entry.path);
            }
        }

        self.engine.emit(SyncEvent::NodeReused {
            path: path.clone(),
            provider_id: renamed.id.clone(),
        });
        self.lock_report().reused.push(path.clone());
        Ok(Some(renamed))
    }

    /// Recreate a parent that returned NotFound, once per stale id
    async fn recreate_parent(
        &self,
        slot: &ParentSlot,
        stale: Option<&RemoteNode>,
    ) -> Result<RemoteNode, ProviderError> {
        let mut current = slot.node.lock().await;
        if stale != Some(&*current) {
            return Ok(current.clone());
        }

        let grandparent = match &slot.parent {
            Some(gp) => Some(gp.node.lock().await.clone()),
            None => None,
        };
        let name = slot.path.name().unwrap_or_default();
        let (fresh, _) = self
            .create_or_adopt(grandparent.as_ref(), name, slot.color.as_ref())
            .await?;

        self.record(&slot.path, &fresh);
        {
            let mut report = self.lock_report();
            report.reused.retain(|p| p != &slot.path);
            report.created.push(slot.path.clone());
        }
        *current = fresh.clone();
        Ok(fresh)
    }

    /// Create a child, reusing a same-named node on Conflict
    async fn create_or_adopt(
        &self,
        parent: Option<&RemoteNode>,
        name: &str,
        color: Option<&ColorSpec>,
    ) -> Result<(RemoteNode, bool), ProviderError> {
        let caps = self.adapter.capabilities();
        let color = color.filter(|_| caps.supports_color);

        let created = self
            .call(&format!("create '{}'", name), || {
                self.adapter.create_node(parent, name, color)
            })
            .await;

        match created {
            Ok(remote) => Ok((remote, true)),
            Err(ProviderError::Conflict(msg)) => {
                let siblings = self
                    .call(&format!("list siblings of '{}'", name), || {
                        self.adapter.list_children(parent)
                    })
                    .await?;
                find_named(siblings, name, |a, b| caps.names_equal(a, b))
                    .map(|remote| (remote, false))
                    .ok_or(ProviderError::Conflict(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Adapter call under a worker permit, retried on transient failures
    async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let permits = &self.permits;
        self.engine
            .retry
            .run(what, || {
                let call = op();
                async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|_| ProviderError::Other("Worker pool closed".to_string()))?;
                    call.await
                }
            })
            .await
    }

    fn record(&self, path: &LogicalPath, remote: &RemoteNode) {
        let mut map = self.lock_map();
        map.record(path.clone(), remote);
        self.engine.persist(&map, path);
    }

    fn fail(&self, node: &SchemaNode, path: &LogicalPath, err: ProviderError) {
        if err.is_fatal_for_run() {
            warn!("Stopping run at {}: {}", path, err);
            self.halted.store(true, Ordering::SeqCst);
            self.lock_report().fatal.get_or_insert(err);
            self.skip_subtree(node, path);
            return;
        }

        let affected = node.subtree_size();
        warn!("Failed to materialize {} ({} nodes skipped): {}", path, affected, err);
        self.engine.emit(SyncEvent::NodeFailed {
            path: path.clone(),
            error: err.clone(),
            affected,
        });
        self.lock_report().failures.push(NodeFailure {
            path: path.clone(),
            error: err,
            affected,
        });
    }

    fn skip_subtree(&self, node: &SchemaNode, path: &LogicalPath) {
        fn walk(node: &SchemaNode, path: &LogicalPath, out: &mut Vec<LogicalPath>) {
            out.push(path.clone());
            for child in &node.children {
                walk(child, &path.child(&child.name), out);
            }
        }

        let mut report = self.lock_report();
        walk(node, path, &mut report.skipped);
    }

    fn should_stop(&self) -> bool {
        self.halted.load(Ordering::SeqCst) || self.engine.cancel.load(Ordering::SeqCst)
    }

    fn lock_map(&self) -> MutexGuard<'_, LabelMap> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_report(&self) -> MutexGuard<'_, Report> {
        self.report.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(self) -> ReconcileOutcome {
        let cancelled = self.engine.cancel.load(Ordering::SeqCst);
        let map = self
            .map
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut report = self
            .report
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        report.created.sort();
        report.reused.sort();
        report.skipped.sort();
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));

        ReconcileOutcome {
            map,
            created: report.created,
            reused: report.reused,
            failures: report.failures,
            skipped: report.skipped,
            fatal: report.fatal,
            cancelled,
        }
    }
}

fn find_named(
    nodes: Vec<RemoteNode>,
    name: &str,
    eq: impl Fn(&str, &str) -> bool,
) -> Option<RemoteNode> {
    nodes
        .into_iter()
        .find(|n| n.path.name().map_or(false, |existing| eq(existing, name)))
}

/// Make sure every node along `path` exists, creating what is missing
///
/// Used for holding areas outside the canonical tree, such as the archive
/// category. Entries are recorded in `map` as holding entries, which never
/// appear in the routing map.
pub async fn ensure_path(
    adapter: &dyn MailboxProvider,
    map: &mut LabelMap,
    path: &LogicalPath,
    retry: &RetryPolicy,
) -> Result<RemoteNode, ProviderError> {
    let caps = adapter.capabilities();
    let mut parent: Option<RemoteNode> = None;
    let mut prefix = LogicalPath::root();

    for segment in path.segments() {
        prefix = prefix.child(segment);

        if let Some(existing) = map.live_node(&prefix) {
            parent = Some(existing);
            continue;
        }

        let created = retry
            .run(&format!("create '{}'", prefix), || {
                adapter.create_node(parent.as_ref(), segment, None)
            })
            .await;

        let remote = match created {
            Ok(remote) => remote,
            Err(ProviderError::Conflict(msg)) => {
                let siblings = retry
                    .run(&format!("list '{}'", prefix), || {
                        adapter.list_children(parent.as_ref())
                    })
                    .await?;
                find_named(siblings, segment, |a, b| caps.names_equal(a, b))
                    .ok_or(ProviderError::Conflict(msg))?
            }
            Err(e) => return Err(e),
        };

        map.hold(prefix.clone(), &remote);
        parent = Some(remote);
    }

    parent.ok_or_else(|| ProviderError::Other("Cannot ensure the mailbox root".to_string()))
}
