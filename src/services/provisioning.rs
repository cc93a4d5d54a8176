//! Provisioning service
//!
//! One call takes a user's business type, team and suppliers to a fully
//! labeled mailbox: compose the taxonomy, apply team changes since the last
//! run, reconcile, and persist the map and snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use label_templates::PlaceholderKind;

use crate::autodiscovery::{ProviderDetection, ProviderDetector};
use crate::config::AppConfig;
use crate::providers::{self, MailboxProvider, ProviderKind};
use crate::reconfigure::{diff_teams, Reconfigurator, ReconfigureOutcome};
use crate::schema::{compose_for_business, CanonicalTree};
use crate::state::RunLocks;
use crate::store::{label_map as map_store, snapshots, DbPool};
use crate::sync::{
    LabelMap, MapPersistence, ReconcileOutcome, RetryPolicy, SyncEngine, SyncEvent,
};
use crate::types::error::{ProviderError, Result, TaxonomyError};
use crate::types::{
    identity_key, ProvisionResult, RunError, RunErrorKind, Supplier, TeamMember, TeamSnapshot,
};

/// Everything needed to provision one mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub user_id: String,
    pub email: String,
    pub business_type: String,
    /// Skips detection when set
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub team: Vec<TeamMember>,
    #[serde(default)]
    pub suppliers: Vec<Supplier>,
    /// Lists applied by the previous run; the stored snapshot is used when absent
    #[serde(default)]
    pub previous: Option<TeamSnapshot>,
}

/// Cancellation flags of the runs in flight, by user
#[derive(Default)]
struct ActiveRuns(Mutex<HashMap<String, Arc<AtomicBool>>>);

impl ActiveRuns {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a fresh flag for `user_id`, dropped again with the guard
    fn start(&self, user_id: &str) -> ActiveRun<'_> {
        let flag = Arc::new(AtomicBool::new(false));
        self.lock().insert(user_id.to_string(), flag.clone());
        ActiveRun {
            runs: self,
            user_id: user_id.to_string(),
            flag,
        }
    }
}

struct ActiveRun<'a> {
    runs: &'a ActiveRuns,
    user_id: String,
    flag: Arc<AtomicBool>,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut runs = self.runs.lock();
        if runs
            .get(&self.user_id)
            .map_or(false, |f| Arc::ptr_eq(f, &self.flag))
        {
            runs.remove(&self.user_id);
        }
    }
}

pub struct ProvisioningService {
    pool: DbPool,
    config: AppConfig,
    locks: Arc<RunLocks>,
    detector: Arc<ProviderDetector>,
    events: Option<flume::Sender<SyncEvent>>,
    runs: ActiveRuns,
}

impl ProvisioningService {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        let ttl = Duration::from_secs(config.detection.cache_ttl_secs);
        Self {
            pool,
            config,
            locks: Arc::new(RunLocks::new()),
            detector: Arc::new(ProviderDetector::new(ttl)),
            events: None,
            runs: ActiveRuns::default(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<ProviderDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Share run locks with other services in the process
    pub fn with_locks(mut self, locks: Arc<RunLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_events(mut self, sender: flume::Sender<SyncEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Canonical tree for a request, without touching the mailbox
    pub fn preview(&self, request: &ProvisionRequest) -> Result<CanonicalTree> {
        let (team, suppliers) = validate_lists(&request.team, &request.suppliers)?;
        compose_for_business(&request.business_type, &team, &suppliers)
    }

    pub async fn detect(&self, email: &str) -> Result<ProviderDetection> {
        Ok(self.detector.detect(email).await?)
    }

    /// Explicit provider, or the one detected from the email address
    pub async fn resolve_provider(&self, request: &ProvisionRequest) -> Result<ProviderKind> {
        if let Some(kind) = request.provider {
            return Ok(kind);
        }

        let detection = self.detect(&request.email).await?;
        detection.provider_kind().ok_or_else(|| {
            TaxonomyError::UnsupportedProvider(format!(
                "{} is hosted by {:?}; only Gmail and Outlook mailboxes can be labeled",
                detection.domain, detection.provider
            ))
        })
    }

    /// Detect the provider, connect with `access_token` and provision
    pub async fn provision_with_token(
        &self,
        request: &ProvisionRequest,
        access_token: &str,
    ) -> Result<ProvisionResult> {
        let kind = self.resolve_provider(request).await?;
        let adapter = providers::connect(kind, access_token)?;
        self.provision(request, adapter.as_ref()).await
    }

    /// Provision the mailbox behind `adapter`
    ///
    /// Invalid input and unknown business types are errors. Provider
    /// failures are reported inside the result, alongside whatever was
    /// created before they happened.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        adapter: &dyn MailboxProvider,
    ) -> Result<ProvisionResult> {
        let (team, suppliers) = validate_lists(&request.team, &request.suppliers)?;
        let tree = compose_for_business(&request.business_type, &team, &suppliers)?;

        let _guard = self.locks.acquire(&request.user_id).await;
        let active = self.runs.start(&request.user_id);
        let run_id = Uuid::new_v4().to_string();
        let kind = adapter.kind();
        info!(
            "Provisioning run {} for {} ({}, {})",
            run_id, request.user_id, tree.business_key, kind
        );

        let mut map = map_store::load_label_map(&self.pool, &request.user_id, kind)?;
        let previous = match &request.previous {
            Some(snapshot) => snapshot.clone(),
            None => snapshots::load_snapshot(&self.pool, &request.user_id)?.unwrap_or_default(),
        };
        let next = TeamSnapshot {
            team: team.clone(),
            suppliers: suppliers.clone(),
        };

        let retry = RetryPolicy::from(&self.config.sync.retry);
        let diff = diff_teams(&previous, &next);
        let reconfigured = Reconfigurator::new(
            adapter,
            &retry,
            self.config.sync.archive_label.clone(),
            self.config.sync.removal_policy,
        )
        .with_cancel_flag(active.flag.clone())
        .apply(&diff, &tree, &mut map)
        .await;
        map_store::replace_label_map(&self.pool, &request.user_id, &map)?;

        let (reconciled, map) = if !reconfigured.should_continue() {
            (None, map)
        } else {
            let mut engine = SyncEngine::new(self.config.sync.max_concurrency, retry)
                .with_cancel_flag(active.flag.clone())
                .with_persistence(MapPersistence {
                    pool: self.pool.clone(),
                    user_id: request.user_id.clone(),
                });
            if let Some(sender) = &self.events {
                engine = engine.with_events(sender.clone());
            }

            let outcome = engine.reconcile(&tree, map, adapter).await;
            map_store::replace_label_map(&self.pool, &request.user_id, &outcome.map)?;
            let map = outcome.map.clone();
            (Some(outcome), map)
        };

        let stopped = reconciled
            .as_ref()
            .map_or(true, |o| o.fatal.is_some() || o.cancelled);
        if !stopped && reconfigured.is_complete() {
            snapshots::save_snapshot(&self.pool, &request.user_id, &next)?;
        }

        let result = build_result(
            run_id,
            kind,
            &tree,
            &suppliers,
            &map,
            reconfigured,
            reconciled.as_ref(),
        );
        info!(
            "Provisioning run {} finished: success={}, created={}, skipped={}",
            result.run_id, result.success, result.labels_created, result.skipped
        );
        Ok(result)
    }

    /// Stop the user's in-flight run at the next node boundary
    ///
    /// Returns false when no run is in flight. Later runs are unaffected.
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.runs.lock().get(user_id) {
            Some(flag) => {
                info!("Cancelling provisioning run for {}", user_id);
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Stop every in-flight run, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let runs = self.runs.lock();
        for flag in runs.values() {
            flag.store(true, Ordering::SeqCst);
        }
        if !runs.is_empty() {
            info!("Cancelling {} provisioning runs", runs.len());
        }
        runs.len()
    }
}

/// Trim names, reject blanks and case-insensitive duplicates
pub fn validate_lists(
    team: &[TeamMember],
    suppliers: &[Supplier],
) -> Result<(Vec<TeamMember>, Vec<Supplier>)> {
    let mut seen = HashSet::new();
    let mut members = Vec::with_capacity(team.len());
    for member in team {
        let name = member.name.trim();
        if name.is_empty() {
            return Err(TaxonomyError::InvalidInput(
                "Team member name must not be empty".to_string(),
            ));
        }
        if !seen.insert(identity_key(name)) {
            return Err(TaxonomyError::InvalidInput(format!(
                "Duplicate team member '{}'",
                name
            )));
        }
        members.push(TeamMember {
            name: name.to_string(),
            ..member.clone()
        });
    }

    let mut seen = HashSet::new();
    let mut vendors = Vec::with_capacity(suppliers.len());
    for supplier in suppliers {
        let supplier = supplier.clone().normalized();
        if supplier.name.is_empty() {
            return Err(TaxonomyError::InvalidInput(
                "Supplier name must not be empty".to_string(),
            ));
        }
        if !seen.insert(identity_key(&supplier.name)) {
            return Err(TaxonomyError::InvalidInput(format!(
                "Duplicate supplier '{}'",
                supplier.name
            )));
        }
        vendors.push(supplier);
    }

    Ok((members, vendors))
}

fn build_result(
    run_id: String,
    kind: ProviderKind,
    tree: &CanonicalTree,
    suppliers: &[Supplier],
    map: &LabelMap,
    reconfigured: ReconfigureOutcome,
    reconciled: Option<&ReconcileOutcome>,
) -> ProvisionResult {
    let mut failures = reconfigured.failures;
    let mut error = reconfigured.fatal.as_ref().map(run_error);
    if error.is_none() && reconfigured.cancelled {
        error = Some(RunError::new(RunErrorKind::Cancelled, "Run cancelled"));
    }
    // Removals left undone; re-additions are counted with the tree below
    let pending_removals = reconfigured
        .skipped
        .iter()
        .filter(|path| !tree.contains_path(path))
        .count();
    let (created, reused, skipped) = match reconciled {
        Some(outcome) => {
            failures.extend(outcome.failures.iter().cloned());
            if error.is_none() {
                error = outcome.fatal.as_ref().map(run_error);
            }
            if error.is_none() && outcome.cancelled {
                error = Some(RunError::new(RunErrorKind::Cancelled, "Run cancelled"));
            }
            (
                outcome.created.len(),
                outcome.reused.len(),
                outcome.skipped_count() + pending_removals,
            )
        }
        // Reconfiguration stopped the run before any node was reconciled
        None => {
            let unmapped = tree
                .preorder()
                .iter()
                .filter(|(path, _)| map.id_for(path).is_none())
                .count();
            (0, 0, unmapped + pending_removals)
        }
    };

    if error.is_none() && !failures.is_empty() {
        let message = format!(
            "{} labels could not be created; re-run to retry them",
            failures.iter().map(|f| f.affected).sum::<usize>()
        );
        warn!("{}", message);
        error = Some(RunError::new(RunErrorKind::Failed, message));
    }

    ProvisionResult {
        run_id,
        success: error.is_none(),
        provider: kind.to_string(),
        labels_created: created,
        labels_reused: reused,
        skipped,
        archived: reconfigured.archived.iter().map(ToString::to_string).collect(),
        restored: reconfigured.restored.iter().map(ToString::to_string).collect(),
        failures,
        error,
        supplier_domains: supplier_domains(tree, suppliers, map),
        label_map: map.routing_map(),
    }
}

fn run_error(err: &ProviderError) -> RunError {
    match err {
        ProviderError::AuthExpired(msg) => RunError::new(RunErrorKind::AuthExpired, msg.clone()),
        ProviderError::PermissionDenied(msg) => {
            RunError::new(RunErrorKind::PermissionDenied, msg.clone())
        }
        other => RunError::new(RunErrorKind::Failed, other.to_string()),
    }
}

/// Sender domain -> routing key of the supplier's label
fn supplier_domains(
    tree: &CanonicalTree,
    suppliers: &[Supplier],
    map: &LabelMap,
) -> BTreeMap<String, String> {
    let Some(category) = tree.placeholder_path(PlaceholderKind::Supplier) else {
        return BTreeMap::new();
    };

    let mut routes = BTreeMap::new();
    for supplier in suppliers {
        let Some(node) = tree.find(&category.child(&supplier.name)) else {
            continue;
        };
        let path = category.child(&node.name);
        if map.id_for(&path).is_none() {
            continue;
        }
        for domain in &supplier.domains {
            routes
                .entry(domain.clone())
                .or_insert_with(|| path.flatten_key());
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::in_memory_pool;
    use crate::sync::engine::tests::FakeMailbox;

    fn service() -> ProvisioningService {
        let mut config = AppConfig::default();
        config.sync.retry.base_delay_ms = 0;
        config.sync.retry.max_delay_ms = 0;
        config.sync.retry.rate_limit_delay_ms = 0;
        ProvisioningService::new(in_memory_pool().unwrap(), config)
    }

    fn request(team: &[&str], suppliers: &[(&str, &str)]) -> ProvisionRequest {
        ProvisionRequest {
            user_id: "user-1".into(),
            email: "owner@gmail.com".into(),
            business_type: "HVAC".into(),
            provider: None,
            team: team.iter().map(|n| TeamMember::new(*n)).collect(),
            suppliers: suppliers
                .iter()
                .map(|(name, domain)| Supplier::new(*name, [*domain]))
                .collect(),
            previous: None,
        }
    }

    #[tokio::test]
    async fn test_fresh_provisioning() {
        let service = service();
        let mailbox = FakeMailbox::gmail();
        let req = request(&["Hailey"], &[("Lennox", "lennox.com")]);

        let result = service.provision(&req, &mailbox).await.unwrap();

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.provider, "gmail");
        assert_eq!(result.skipped, 0);
        assert_eq!(result.labels_created, service.preview(&req).unwrap().node_count());
        assert!(result.label_map.contains_key("MANAGER_HAILEY"));
        assert!(result.label_map.contains_key("SUPPLIERS_LENNOX"));
        assert!(result.label_map.contains_key("SUPPLIERS_CARRIER"));
        assert_eq!(
            result.supplier_domains.get("lennox.com").map(String::as_str),
            Some("SUPPLIERS_LENNOX")
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let service = service();
        let mailbox = FakeMailbox::gmail();
        let req = request(&["Hailey"], &[("Lennox", "lennox.com")]);

        let first = service.provision(&req, &mailbox).await.unwrap();
        let creates = mailbox.create_count();
        let second = service.provision(&req, &mailbox).await.unwrap();

        assert!(second.success);
        assert_eq!(second.labels_created, 0);
        assert_eq!(mailbox.create_count(), creates);
        assert_eq!(second.label_map, first.label_map);
    }

    #[tokio::test]
    async fn test_team_removal_uses_stored_snapshot() {
        let service = service();
        let mailbox = FakeMailbox::gmail();

        let first = service
            .provision(&request(&["Hailey", "Aaron"], &[]), &mailbox)
            .await
            .unwrap();
        let second = service
            .provision(&request(&["Hailey"], &[]), &mailbox)
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(second.archived, vec!["MANAGER/Aaron".to_string()]);
        assert!(!second.label_map.contains_key("MANAGER_AARON"));
        assert_eq!(
            second.label_map.get("MANAGER_HAILEY"),
            first.label_map.get("MANAGER_HAILEY")
        );
        assert_eq!(second.labels_created, 0);
    }

    #[tokio::test]
    async fn test_readded_member_restored() {
        let service = service();
        let mailbox = FakeMailbox::gmail();

        let first = service
            .provision(&request(&["Hailey", "Aaron"], &[]), &mailbox)
            .await
            .unwrap();
        service
            .provision(&request(&["Hailey"], &[]), &mailbox)
            .await
            .unwrap();
        let third = service
            .provision(&request(&["Hailey", "Aaron"], &[]), &mailbox)
            .await
            .unwrap();

        assert_eq!(third.restored, vec!["MANAGER/Aaron".to_string()]);
        assert_eq!(
            third.label_map.get("MANAGER_AARON"),
            first.label_map.get("MANAGER_AARON")
        );
    }

    #[tokio::test]
    async fn test_auth_expiry_reported_for_reauth() {
        let service = service();
        let mailbox = FakeMailbox::gmail();
        mailbox
            .broken
            .lock()
            .unwrap()
            .insert("BANKING".into(), ProviderError::AuthExpired("invalid_grant".into()));

        let result = service
            .provision(&request(&["Hailey"], &[]), &mailbox)
            .await
            .unwrap();

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.kind, RunErrorKind::AuthExpired);
        assert!(error.requires_reauth);
        assert!(result.skipped > 0);
        assert!(snapshots::load_snapshot(&service.pool, "user-1")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_reported_and_resumed() {
        let service = service();
        let mailbox = FakeMailbox::gmail();
        mailbox.broken.lock().unwrap().insert(
            "Lennox".into(),
            ProviderError::Other("Invalid label name".into()),
        );
        let req = request(&["Hailey"], &[("Lennox", "lennox.com")]);

        let first = service.provision(&req, &mailbox).await.unwrap();
        assert!(!first.success);
        assert_eq!(first.error.as_ref().map(|e| e.kind), Some(RunErrorKind::Failed));
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.skipped, 1);
        assert!(first.label_map.contains_key("MANAGER_HAILEY"));
        assert!(first.supplier_domains.is_empty());

        mailbox.broken.lock().unwrap().clear();
        let second = service.provision(&req, &mailbox).await.unwrap();
        assert!(second.success);
        assert_eq!(second.labels_created, 1);
    }

    #[tokio::test]
    async fn test_invalid_team_rejected() {
        let service = service();
        let mailbox = FakeMailbox::gmail();

        let duplicate = request(&["Hailey", " hailey"], &[]);
        assert!(matches!(
            service.provision(&duplicate, &mailbox).await,
            Err(TaxonomyError::InvalidInput(_))
        ));

        let blank = request(&["  "], &[]);
        assert!(matches!(
            service.provision(&blank, &mailbox).await,
            Err(TaxonomyError::InvalidInput(_))
        ));
        assert_eq!(mailbox.create_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_business_type_rejected() {
        let service = service();
        let mut req = request(&[], &[]);
        req.business_type = "Bakery".into();

        assert!(matches!(
            service.provision(&req, &FakeMailbox::gmail()).await,
            Err(TaxonomyError::Template(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_runs_for_one_user_serialized() {
        let service = service();
        let mailbox = FakeMailbox::gmail();
        let req = request(&["Hailey"], &[("Lennox", "lennox.com")]);

        let (a, b) = tokio::join!(
            service.provision(&req, &mailbox),
            service.provision(&req, &mailbox)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.labels_created + b.labels_created, mailbox.create_count());
        assert!(a.labels_created == 0 || b.labels_created == 0);
        assert_eq!(a.label_map, b.label_map);
    }

    #[tokio::test]
    async fn test_gmail_address_resolves_without_dns() {
        let service = service();
        let kind = service
            .resolve_provider(&request(&[], &[]))
            .await
            .unwrap();
        assert_eq!(kind, ProviderKind::Gmail);
    }

    #[test]
    fn test_validate_lists_normalizes() {
        let (team, suppliers) = validate_lists(
            &[TeamMember::new("  Hailey ")],
            &[Supplier::new(" Lennox ", ["@Lennox.com"])],
        )
        .unwrap();

        assert_eq!(team[0].name, "Hailey");
        assert_eq!(suppliers[0].name, "Lennox");
        assert!(suppliers[0].domains.contains("lennox.com"));
    }

    #[tokio::test]
    async fn test_cancel_without_run_does_not_poison_later_runs() {
        let service = service();
        let mailbox = FakeMailbox::gmail();

        assert!(!service.cancel("user-1"));
        assert_eq!(service.cancel_all(), 0);

        let result = service
            .provision(&request(&["Hailey"], &[]), &mailbox)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.skipped, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_then_fresh_run_completes() {
        let (tx, rx) = flume::unbounded();
        let service = service().with_events(tx);
        let mailbox = FakeMailbox::gmail();
        let req = request(&["Hailey", "Aaron"], &[("Lennox", "lennox.com")]);

        let canceller = async {
            while let Ok(event) = rx.recv_async().await {
                if matches!(event, SyncEvent::NodeCreated { .. }) {
                    assert!(service.cancel("user-1"));
                    break;
                }
            }
        };
        let (first, _) = tokio::join!(service.provision(&req, &mailbox), canceller);
        let first = first.unwrap();

        assert!(!first.success);
        assert_eq!(first.error.map(|e| e.kind), Some(RunErrorKind::Cancelled));
        assert!(first.skipped > 0);
        assert!(snapshots::load_snapshot(&service.pool, "user-1")
            .unwrap()
            .is_none());

        // The cancelled run's flag is gone with it
        assert!(!service.cancel("user-1"));
        let second = service.provision(&req, &mailbox).await.unwrap();
        assert!(second.success);
        assert_eq!(second.skipped, 0);
        assert!(second.error.is_none());
        assert!(second.label_map.contains_key("MANAGER_AARON"));
    }

    #[tokio::test]
    async fn test_renamed_member_keeps_folder() {
        let service = service();
        let mailbox = FakeMailbox::new(ProviderKind::Outlook);
        let mut req = request(&["hailey"], &[]);
        req.provider = Some(ProviderKind::Outlook);

        let first = service.provision(&req, &mailbox).await.unwrap();
        let creates = mailbox.create_count();

        req.team = vec![TeamMember::new("Hailey")];
        let second = service.provision(&req, &mailbox).await.unwrap();

        assert!(second.success);
        assert_eq!(second.labels_created, 0);
        assert_eq!(mailbox.create_count(), creates);
        assert_eq!(
            second.label_map.get("MANAGER_HAILEY"),
            first.label_map.get("MANAGER_HAILEY")
        );

        // The rename is persisted, so a third run still reuses it
        let third = service.provision(&req, &mailbox).await.unwrap();
        assert_eq!(third.labels_created, 0);
        assert_eq!(third.label_map, second.label_map);
    }

    #[tokio::test]
    async fn test_holding_area_not_routed() {
        let service = service();
        let mailbox = FakeMailbox::gmail();

        service
            .provision(&request(&["Hailey", "Aaron"], &[]), &mailbox)
            .await
            .unwrap();
        let second = service
            .provision(&request(&["Hailey"], &[]), &mailbox)
            .await
            .unwrap();

        assert_eq!(second.archived.len(), 1);
        assert!(second.label_map.keys().all(|k| !k.starts_with("ARCHIVED")));
    }
}
