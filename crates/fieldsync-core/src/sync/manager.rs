//! Process-wide entry point tying the per-kind engines together.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use super::orchestrator::{LocalCounts, SyncEngine};
use super::scheduler::BackgroundScheduler;
use crate::connectivity::ConnectivityMonitor;
use crate::models::RecordKind;
use crate::owner::OwnerProvider;
use crate::state::SyncState;
use crate::{Error, Result};

/// Aggregated result of [`SyncManager::perform_full_sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullSyncOutcome {
    /// Every kind synchronized all of its pending records
    Success {
        synced: BTreeMap<RecordKind, usize>,
    },
    /// At least one kind left failed records behind
    PartialSuccess {
        synced: BTreeMap<RecordKind, usize>,
        errors: BTreeMap<RecordKind, String>,
    },
}

impl FullSyncOutcome {
    pub fn synced(&self) -> &BTreeMap<RecordKind, usize> {
        match self {
            Self::Success { synced } | Self::PartialSuccess { synced, .. } => synced,
        }
    }

    pub fn total_synced(&self) -> usize {
        self.synced().values().sum()
    }
}

/// Offline cache summary for the signed-in owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineDataInfo {
    pub total_cached: usize,
    pub total_unsynced: usize,
    pub has_offline_data: bool,
    pub per_kind: BTreeMap<RecordKind, LocalCounts>,
}

/// Facade used by the application shell.
pub struct SyncManager {
    engines: Vec<Arc<dyn SyncEngine>>,
    scheduler: BackgroundScheduler,
    connectivity: ConnectivityMonitor,
    owners: Arc<dyn OwnerProvider>,
    initialized: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        engines: Vec<Arc<dyn SyncEngine>>,
        scheduler: BackgroundScheduler,
        connectivity: ConnectivityMonitor,
        owners: Arc<dyn OwnerProvider>,
    ) -> Self {
        Self {
            engines,
            scheduler,
            connectivity,
            owners,
            initialized: AtomicBool::new(false),
            watcher: Mutex::new(None),
        }
    }

    fn kinds(&self) -> Vec<RecordKind> {
        self.engines.iter().map(|engine| engine.kind()).collect()
    }

    /// Register periodic jobs for every kind and start watching for
    /// connectivity regained. Returns false when already initialized.
    pub fn initialize(&self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("Sync manager already initialized");
            return false;
        }

        for kind in self.kinds() {
            self.scheduler.schedule_periodic(kind);
        }
        self.spawn_connectivity_watcher();
        tracing::info!(kinds = self.engines.len(), "Sync manager initialized");
        true
    }

    fn spawn_connectivity_watcher(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, connectivity watcher not started");
            return;
        };

        let mut online = self.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();
        let scheduler = self.scheduler.clone();
        let kinds = self.kinds();

        let handle = runtime.spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    tracing::info!("Connectivity regained, requesting sync");
                    for kind in &kinds {
                        scheduler.request_immediate(*kind, None);
                    }
                }
                was_online = is_online;
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Sweep every kind now.
    ///
    /// Fails fast, with no remote calls, when nobody is signed in or the
    /// network is unavailable. A kind that errors does not stop the others.
    /// A run already in flight for a kind is awaited, then swept again, so
    /// the outcome always reflects a finished sweep.
    pub async fn perform_full_sync(&self) -> Result<FullSyncOutcome> {
        let Some(owner) = self.owners.current_owner() else {
            tracing::warn!("Full sync requested without a signed-in owner");
            return Err(Error::NotAuthenticated);
        };
        if !self.connectivity.is_online() {
            tracing::info!(owner_id = %owner, "Full sync requested while offline");
            return Err(Error::ConnectivityUnavailable);
        }

        let mut synced = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut unexpected = None;

        for engine in &self.engines {
            let kind = engine.kind();
            match engine.sync_pending_waiting(None).await {
                Ok(report) => {
                    synced.insert(kind, report.succeeded);
                    if report.failed > 0 {
                        errors.insert(kind, report.error_summary());
                    }
                }
                Err(error) => {
                    tracing::error!(%kind, error = %error, "Full sync failed for kind");
                    if unexpected.is_none() {
                        unexpected = Some(error);
                    }
                }
            }
        }

        if let Some(error) = unexpected {
            return Err(error);
        }

        tracing::info!(owner_id = %owner, failed_kinds = errors.len(), "Full sync finished");
        if errors.is_empty() {
            Ok(FullSyncOutcome::Success { synced })
        } else {
            Ok(FullSyncOutcome::PartialSuccess { synced, errors })
        }
    }

    pub async fn offline_data_info(&self) -> Result<OfflineDataInfo> {
        let owner = self.owners.current_owner().ok_or(Error::NotAuthenticated)?;

        let mut info = OfflineDataInfo::default();
        for engine in &self.engines {
            let counts = engine.local_counts(&owner).await?;
            info.total_cached += counts.cached;
            info.total_unsynced += counts.unsynced;
            info.per_kind.insert(engine.kind(), counts);
        }
        info.has_offline_data = info.total_cached > 0;
        Ok(info)
    }

    /// Request an immediate run for every kind, across all owners
    pub fn schedule_immediate_sync(&self) {
        for kind in self.kinds() {
            self.scheduler.request_immediate(kind, None);
        }
    }

    /// Cancel every job and stop the connectivity watcher.
    ///
    /// A later `initialize` registers the periodic jobs again.
    pub fn cleanup(&self) {
        self.scheduler.cancel_all();
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("Sync manager cleaned up");
    }

    pub async fn sync_state(&self) -> Result<SyncState> {
        let running = self.engines.iter().any(|engine| engine.is_running());
        let mut unsynced = 0;
        for engine in &self.engines {
            unsynced += engine.status().await?.total_unsynced;
        }
        Ok(SyncState::derive(
            self.connectivity.is_online(),
            running,
            unsynced,
        ))
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OwnerId, Record};
    use crate::owner::SessionOwner;
    use crate::sync::scheduler::JobTrigger;
    use crate::sync::{ReportSync, TaskSync};
    use crate::test_support::Harness;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn owner() -> OwnerId {
        "inspector-1".parse().unwrap()
    }

    struct Fixture {
        harness: Harness,
        reports: ReportSync,
        tasks: TaskSync,
        session: Arc<SessionOwner>,
        manager: SyncManager,
    }

    fn fixture(online: bool, signed_in: bool) -> Fixture {
        let harness = Harness::new(online);
        let reports = ReportSync::new(harness.deps());
        let tasks = TaskSync::new(harness.deps());
        let session = Arc::new(SessionOwner::new(signed_in.then(owner)));
        let manager = SyncManager::new(
            vec![reports.engine(), tasks.engine()],
            harness.scheduler.clone(),
            harness.connectivity.clone(),
            session.clone(),
        );
        Fixture {
            harness,
            reports,
            tasks,
            session,
            manager,
        }
    }

    #[tokio::test]
    async fn full_sync_without_owner_makes_no_remote_calls() {
        let f = fixture(true, false);
        f.reports
            .create_record(Record::draft(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();

        let err = f.manager.perform_full_sync().await.unwrap_err();

        assert!(matches!(err, Error::NotAuthenticated));
        assert_eq!(f.harness.remote.calls(), 0);
    }

    #[tokio::test]
    async fn full_sync_offline_fails_fast() {
        let f = fixture(false, true);

        let err = f.manager.perform_full_sync().await.unwrap_err();

        assert!(matches!(err, Error::ConnectivityUnavailable));
        assert_eq!(f.harness.remote.calls(), 0);
    }

    #[tokio::test]
    async fn full_sync_reports_success_per_kind() {
        let f = fixture(false, true);
        f.reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();
        f.tasks
            .create_record(Record::new(RecordKind::Task, owner(), json!({})))
            .await
            .unwrap();
        f.harness.connectivity.set_online(true);

        let outcome = f.manager.perform_full_sync().await.unwrap();

        assert_eq!(
            outcome,
            FullSyncOutcome::Success {
                synced: BTreeMap::from([(RecordKind::Report, 1), (RecordKind::Task, 1)]),
            }
        );
    }

    #[tokio::test]
    async fn full_sync_partial_success_still_attempts_every_kind() {
        let f = fixture(false, true);
        f.reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({ "title": "bad" })))
            .await
            .unwrap();
        f.tasks
            .create_record(Record::new(RecordKind::Task, owner(), json!({ "title": "ok" })))
            .await
            .unwrap();
        f.harness.remote.fail_title("bad");
        f.harness.connectivity.set_online(true);

        let outcome = f.manager.perform_full_sync().await.unwrap();

        let FullSyncOutcome::PartialSuccess { synced, errors } = outcome else {
            panic!("expected partial success, got {outcome:?}");
        };
        assert_eq!(synced.get(&RecordKind::Task), Some(&1));
        assert_eq!(synced.get(&RecordKind::Report), Some(&0));
        assert!(errors.contains_key(&RecordKind::Report));
        assert!(!errors.contains_key(&RecordKind::Task));
    }

    #[tokio::test]
    async fn full_sync_waits_for_in_flight_run_instead_of_reporting_success() {
        let f = fixture(false, true);
        f.reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({ "title": "bad" })))
            .await
            .unwrap();
        f.harness.remote.fail_title("bad");
        f.harness.connectivity.set_online(true);
        let gate = f.harness.remote.gate_creates();

        let engine = f.reports.engine();
        let background = tokio::spawn(async move { engine.sync_pending(None).await });
        gate.entered.notified().await;

        let (outcome, ()) = tokio::join!(f.manager.perform_full_sync(), async {
            gate.release();
        });
        let background = background.await.unwrap().unwrap();

        assert_eq!(background.failed, 1);
        let FullSyncOutcome::PartialSuccess { synced, errors } = outcome.unwrap() else {
            panic!("a kind with a failing record must not report success");
        };
        assert_eq!(synced.get(&RecordKind::Report), Some(&0));
        assert!(errors.contains_key(&RecordKind::Report));
        assert_eq!(f.harness.remote.creates(), 2);
    }

    #[tokio::test]
    async fn initialize_registers_periodic_jobs_once() {
        let f = fixture(false, true);

        assert!(f.manager.initialize());
        assert!(!f.manager.initialize());

        let periodic = f
            .harness
            .host
            .specs()
            .into_iter()
            .filter(|spec| matches!(spec.trigger, JobTrigger::Periodic { .. }))
            .count();
        assert_eq!(periodic, 2);
    }

    #[tokio::test]
    async fn connectivity_regained_requests_immediate_jobs() {
        let f = fixture(false, true);
        f.manager.initialize();

        f.harness.connectivity.set_online(true);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.harness.host.immediate_count(RecordKind::Report), 1);
        assert_eq!(f.harness.host.immediate_count(RecordKind::Task), 1);
    }

    #[tokio::test]
    async fn cleanup_cancels_jobs_and_allows_reinitialize() {
        let f = fixture(false, true);
        f.manager.initialize();

        f.manager.cleanup();

        assert_eq!(f.harness.host.cancel_all_calls(), 1);
        assert!(f.manager.initialize());
    }

    #[tokio::test]
    async fn offline_data_info_counts_current_owner() {
        let f = fixture(false, true);
        f.reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();
        f.reports
            .create_record(Record::draft(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();
        f.tasks
            .create_record(Record::new(
                RecordKind::Task,
                "someone-else".parse().unwrap(),
                json!({}),
            ))
            .await
            .unwrap();

        let info = f.manager.offline_data_info().await.unwrap();

        assert_eq!(info.total_cached, 2);
        assert_eq!(info.total_unsynced, 2);
        assert!(info.has_offline_data);
        assert_eq!(
            info.per_kind.get(&RecordKind::Task),
            Some(&LocalCounts::default())
        );
    }

    #[tokio::test]
    async fn sync_state_follows_connectivity_and_backlog() {
        let f = fixture(false, true);
        f.reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();
        assert_eq!(f.manager.sync_state().await.unwrap(), SyncState::Offline);

        f.harness.connectivity.set_online(true);
        assert_eq!(f.manager.sync_state().await.unwrap(), SyncState::Pending);

        f.manager.perform_full_sync().await.unwrap();
        assert_eq!(f.manager.sync_state().await.unwrap(), SyncState::Synced);
    }

    #[tokio::test]
    async fn schedule_immediate_sync_covers_every_kind() {
        let f = fixture(true, true);

        f.manager.schedule_immediate_sync();

        assert_eq!(f.harness.host.immediate_count(RecordKind::Report), 1);
        assert_eq!(f.harness.host.immediate_count(RecordKind::Task), 1);
        assert!(f.harness.host.specs().iter().all(|spec| spec.owner.is_none()));
    }

    #[tokio::test]
    async fn signing_out_blocks_full_sync() {
        let f = fixture(true, true);
        f.session.sign_out();

        let err = f.manager.perform_full_sync().await.unwrap_err();

        assert!(matches!(err, Error::NotAuthenticated));
    }
}
