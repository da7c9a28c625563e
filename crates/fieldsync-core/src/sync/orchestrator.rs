//! Per-kind sync orchestration shared by reports and tasks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use super::retention::RetentionPolicy;
use super::scheduler::BackgroundScheduler;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{LocalStore, RecordRepository};
use crate::media::MediaStore;
use crate::models::{now_millis, MediaRef, OwnerId, Record, RecordId, RecordKind, SyncStatus};
use crate::remote::RemoteStore;
use crate::{Error, Result};

/// Collaborators injected into every orchestrator.
#[derive(Clone)]
pub struct SyncDeps {
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteStore>,
    pub media: Arc<dyn MediaStore>,
    pub connectivity: ConnectivityMonitor,
    pub scheduler: BackgroundScheduler,
    pub config: Arc<EngineConfig>,
}

/// What a record kind supports on top of the shared algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    pub kind: RecordKind,
    pub supports_media: bool,
    pub supports_drafts: bool,
}

/// Aggregate counts of one `sync_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub total_attempted: usize,
    /// The trigger was folded into a run already in flight
    pub coalesced: bool,
    /// One message per failed record
    pub errors: Vec<String>,
    /// Highest retry count among the records that failed in this run
    pub max_failed_retries: u32,
}

impl SyncBatchReport {
    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    /// Short human readable description of the failures
    pub fn error_summary(&self) -> String {
        match self.errors.as_slice() {
            [] => String::new(),
            [only] => only.clone(),
            [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
        }
    }
}

/// Informational status of pending records for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatusSummary {
    pub total_unsynced: usize,
    /// Pending records whose retry count reached the failure threshold
    pub failed_count: usize,
    pub last_sync_attempt: Option<i64>,
}

/// Local cache counters for one owner and kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalCounts {
    pub cached: usize,
    pub unsynced: usize,
}

/// Kind-erased view of an orchestrator used by workers and the manager.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    fn kind(&self) -> RecordKind;

    async fn sync_pending(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport>;

    /// Wait for any in-flight run, then sweep
    async fn sync_pending_waiting(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport>;

    async fn status(&self) -> Result<SyncStatusSummary>;

    async fn local_counts(&self, owner: &OwnerId) -> Result<LocalCounts>;

    /// Whether a `sync_pending` run is in flight
    fn is_running(&self) -> bool;
}

/// Offline-first write, read and reconciliation paths for one record kind.
pub struct RecordSync {
    profile: KindProfile,
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    media: Arc<dyn MediaStore>,
    connectivity: ConnectivityMonitor,
    scheduler: BackgroundScheduler,
    retention: RetentionPolicy,
    failed_threshold: u32,
    run_lock: Mutex<()>,
    rerun_requested: AtomicBool,
    rerun_unscoped: AtomicBool,
}

impl RecordSync {
    pub fn new(profile: KindProfile, deps: SyncDeps) -> Self {
        Self {
            profile,
            store: deps.store,
            remote: deps.remote,
            media: deps.media,
            connectivity: deps.connectivity,
            scheduler: deps.scheduler,
            retention: RetentionPolicy::new(deps.config.retain_base),
            failed_threshold: deps.config.failed_retry_threshold,
            run_lock: Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            rerun_unscoped: AtomicBool::new(false),
        }
    }

    pub const fn profile(&self) -> KindProfile {
        self.profile
    }

    pub(crate) fn media_store(&self) -> &dyn MediaStore {
        self.media.as_ref()
    }

    fn validate(&self, record: &Record) -> Result<()> {
        let kind = self.profile.kind;
        if record.kind != kind {
            return Err(Error::InvalidInput(format!(
                "expected a {kind} record, got a {}",
                record.kind
            )));
        }
        if record.is_draft && !self.profile.supports_drafts {
            return Err(Error::InvalidInput(format!("{kind} records cannot be drafts")));
        }
        if !record.media.is_empty() && !self.profile.supports_media {
            return Err(Error::InvalidInput(format!(
                "{kind} records cannot carry media"
            )));
        }
        Ok(())
    }

    /// Create a record, remotely when possible and queued otherwise.
    ///
    /// Returns the server id on the direct path and the temporary id when
    /// the record was queued.
    pub async fn create_record(&self, record: Record) -> Result<RecordId> {
        self.validate(&record)?;
        self.write_record(record).await
    }

    /// Apply a local edit, remotely when possible and queued otherwise.
    pub async fn update_record(&self, mut record: Record) -> Result<RecordId> {
        self.validate(&record)?;
        record.mark_pending();
        self.write_record(record).await
    }

    /// Turn a draft into a regular record and submit it.
    pub async fn promote_draft(&self, id: &RecordId) -> Result<RecordId> {
        let kind = self.profile.kind;
        let mut record = self
            .store
            .read(|repo| repo.get(kind, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("{kind} {id}")))?;

        if !record.is_draft {
            return Ok(record.id);
        }

        record.is_draft = false;
        record.mark_pending();
        tracing::info!(%kind, record_id = %record.id, "Promoting draft");
        self.write_record(record).await
    }

    async fn write_record(&self, mut record: Record) -> Result<RecordId> {
        if !record.is_draft && self.connectivity.is_online() {
            match self.push_direct(&mut record).await {
                Ok(id) => return Ok(id),
                Err(error) if error.is_remote_failure() => {
                    tracing::warn!(
                        kind = %self.profile.kind,
                        record_id = %record.id,
                        error = %error,
                        "Direct write failed, queueing for background sync"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        self.queue_locally(record).await
    }

    async fn push_direct(&self, record: &mut Record) -> Result<RecordId> {
        let kind = self.profile.kind;
        self.upload_pending_media(record).await?;
        let uploaded = uploaded_local_paths(&record.media);

        let previous_id = record.id.clone();
        let server_id = self.submit(record).await?;
        record.mark_synced(server_id, now_millis());

        let owner = record.owner_id.clone();
        let synced = record.clone();
        self.store
            .write(|repo| {
                repo.replace_row(&previous_id, &synced)?;
                self.retention.apply(repo, kind, &owner)?;
                Ok(())
            })
            .await?;

        self.discard_local_media(&uploaded).await;
        tracing::info!(%kind, record_id = %record.id, "Record written to remote store");
        Ok(record.id.clone())
    }

    async fn queue_locally(&self, mut record: Record) -> Result<RecordId> {
        let kind = self.profile.kind;
        record.sync_status = SyncStatus::Unsynced;
        record.needs_sync = !record.is_draft;

        let owner = record.owner_id.clone();
        let already_pending = self
            .store
            .write(|repo| {
                let already_pending = repo
                    .get(kind, &record.id)?
                    .is_some_and(|existing| existing.is_pending());
                repo.upsert(&record)?;
                self.retention.apply(repo, kind, &owner)?;
                Ok(already_pending)
            })
            .await?;

        if record.is_draft {
            tracing::debug!(%kind, record_id = %record.id, "Draft saved locally");
        } else if already_pending {
            tracing::debug!(%kind, record_id = %record.id, "Record already queued");
        } else {
            self.scheduler.request_immediate(kind, Some(owner));
            tracing::info!(%kind, record_id = %record.id, "Record queued for sync");
        }
        Ok(record.id)
    }

    /// Create or update remotely depending on whether the id is confirmed
    async fn submit(&self, record: &Record) -> Result<RecordId> {
        if record.id.is_temporary() {
            self.remote.create(record).await
        } else {
            self.remote.update(record).await?;
            Ok(record.id.clone())
        }
    }

    /// Upload every attachment still on device, recording URLs in place.
    ///
    /// URLs resolved before a failure stay on the record.
    async fn upload_pending_media(&self, record: &mut Record) -> Result<()> {
        for media in record.media.iter_mut().filter(|m| m.is_pending_upload()) {
            let url = self.remote.upload_media(media).await.map_err(|error| {
                if matches!(error, Error::MediaUpload(_)) {
                    error
                } else {
                    Error::MediaUpload(error.to_string())
                }
            })?;
            media.remote_url = Some(url);
        }
        Ok(())
    }

    async fn discard_local_media(&self, paths: &[String]) {
        for path in paths {
            if let Err(error) = self.media.delete(path).await {
                tracing::warn!(path, error = %error, "Failed to delete uploaded media file");
            }
        }
    }

    /// Read one record locally, falling back to the remote store.
    pub async fn fetch_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let kind = self.profile.kind;
        if let Some(record) = self.store.read(|repo| repo.get(kind, id)).await? {
            return Ok(Some(record));
        }
        if !self.connectivity.is_online() {
            return Ok(None);
        }

        let Some(remote) = self.remote.get(kind, id).await? else {
            return Ok(None);
        };
        let owner = remote.owner_id.clone();
        self.merge_remote(&owner, vec![remote]).await?;
        self.store.read(|repo| repo.get(kind, id)).await
    }

    /// Read an owner's records locally, falling back to the remote store
    /// when nothing is cached.
    pub async fn fetch_by_owner(&self, owner: &OwnerId) -> Result<Vec<Record>> {
        let kind = self.profile.kind;
        let local = self.store.read(|repo| repo.list_by_owner(kind, owner)).await?;
        if !local.is_empty() || !self.connectivity.is_online() {
            return Ok(local);
        }

        let remote = self.remote.list_by_owner(kind, owner).await?;
        self.merge_remote(owner, remote).await?;
        self.store.read(|repo| repo.list_by_owner(kind, owner)).await
    }

    /// Merge a one-shot remote refresh, then read from the local store.
    ///
    /// Remote failures are logged; the local snapshot is always returned.
    pub async fn refresh_by_owner(&self, owner: &OwnerId) -> Result<Vec<Record>> {
        let kind = self.profile.kind;
        if self.connectivity.is_online() {
            match self.remote.list_by_owner(kind, owner).await {
                Ok(remote) => {
                    self.merge_remote(owner, remote).await?;
                }
                Err(error) => {
                    tracing::warn!(%kind, owner_id = %owner, error = %error, "Remote refresh failed");
                }
            }
        }
        self.store.read(|repo| repo.list_by_owner(kind, owner)).await
    }

    /// Emit the owner's local records after a refresh and after every local
    /// write, until the receiver is dropped.
    pub fn observe_by_owner(self: &Arc<Self>, owner: OwnerId) -> watch::Receiver<Vec<Record>> {
        let (sender, receiver) = watch::channel(Vec::new());
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let kind = this.profile.kind;
            let mut revisions = this.store.subscribe();
            revisions.borrow_and_update();

            match this.refresh_by_owner(&owner).await {
                Ok(records) => {
                    if sender.send(records).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(%kind, owner_id = %owner, error = %error, "Initial load failed");
                }
            }

            loop {
                tokio::select! {
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = sender.closed() => break,
                }

                match this.store.read(|repo| repo.list_by_owner(kind, &owner)).await {
                    Ok(records) => {
                        if sender.send(records).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%kind, owner_id = %owner, error = %error, "Reload failed");
                    }
                }
            }
            tracing::debug!(%kind, owner_id = %owner, "Observer closed");
        });

        receiver
    }

    /// Cache remote rows as synced, never touching locally diverged rows.
    async fn merge_remote(&self, owner: &OwnerId, rows: Vec<Record>) -> Result<usize> {
        let kind = self.profile.kind;
        let (merged, skipped) = self
            .store
            .write(|repo| {
                let mut merged = 0;
                let mut skipped = 0;
                for mut row in rows {
                    if row.kind != kind {
                        continue;
                    }
                    let local_diverged = repo
                        .get(kind, &row.id)?
                        .is_some_and(|local| local.needs_sync || local.is_draft);
                    if local_diverged {
                        skipped += 1;
                        continue;
                    }
                    row.sync_status = SyncStatus::Synced;
                    row.needs_sync = false;
                    row.is_draft = false;
                    row.sync_retry_count = 0;
                    repo.upsert(&row)?;
                    merged += 1;
                }
                self.retention.apply(repo, kind, owner)?;
                Ok((merged, skipped))
            })
            .await?;

        tracing::debug!(%kind, owner_id = %owner, merged, skipped, "Merged remote records");
        Ok(merged)
    }

    /// Reconcile every pending record, one at a time.
    ///
    /// A trigger that arrives while a run is in flight returns a coalesced
    /// report; the running pass then sweeps once more for records it has not
    /// attempted yet, across every owner when the coalesced trigger was
    /// unscoped.
    pub async fn sync_pending(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport> {
        self.run(owner, false).await
    }

    /// Like [`Self::sync_pending`], but waits for an in-flight run to finish
    /// and then sweeps itself instead of coalescing into it.
    pub async fn sync_pending_waiting(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport> {
        self.run(owner, true).await
    }

    async fn run(&self, owner: Option<&OwnerId>, wait: bool) -> Result<SyncBatchReport> {
        let kind = self.profile.kind;
        let mut report = SyncBatchReport::default();
        let mut attempted = HashSet::new();
        let mut scope = owner.cloned();
        let mut swept = false;

        loop {
            let guard = if wait && !swept {
                self.run_lock.lock().await
            } else if let Ok(guard) = self.run_lock.try_lock() {
                guard
            } else {
                if scope.is_none() {
                    self.rerun_unscoped.store(true, Ordering::SeqCst);
                }
                self.rerun_requested.store(true, Ordering::SeqCst);
                if swept {
                    // Another run took over after ours and sweeps what is left
                    break;
                }
                tracing::debug!(%kind, "Sync already running, coalescing trigger");
                return Ok(SyncBatchReport::coalesced());
            };

            self.sweep(&mut scope, &mut report, &mut attempted).await?;
            swept = true;
            drop(guard);

            // A trigger may have landed between the last sweep and the unlock
            if !self.rerun_requested.load(Ordering::SeqCst) {
                break;
            }
        }

        tracing::info!(
            %kind,
            succeeded = report.succeeded,
            failed = report.failed,
            total = report.total_attempted,
            "Sync run finished"
        );
        Ok(report)
    }

    /// Attempt pending records until no trigger asks for another pass.
    /// Must be called with `run_lock` held.
    async fn sweep(
        &self,
        scope: &mut Option<OwnerId>,
        report: &mut SyncBatchReport,
        attempted: &mut HashSet<RecordId>,
    ) -> Result<()> {
        let kind = self.profile.kind;
        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            if self.rerun_unscoped.swap(false, Ordering::SeqCst) {
                *scope = None;
            }

            let owner = scope.clone();
            let pending = self
                .store
                .read(|repo| repo.list_pending(kind, owner.as_ref()))
                .await?;

            for record in pending {
                if !attempted.insert(record.id.clone()) {
                    continue;
                }
                report.total_attempted += 1;
                let record_id = record.id.clone();
                let retries = record.sync_retry_count.saturating_add(1);

                match self.sync_one(record).await {
                    Ok(()) => report.succeeded += 1,
                    Err(error) => {
                        report.failed += 1;
                        report.max_failed_retries = report.max_failed_retries.max(retries);
                        report.errors.push(format!("{record_id}: {error}"));
                    }
                }
            }

            if !self.rerun_requested.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Push one record and commit the outcome locally.
    ///
    /// A failure stamps `last_sync_attempt` and bumps `sync_retry_count`,
    /// which is what `status().failed_count` reports on.
    async fn sync_one(&self, mut record: Record) -> Result<()> {
        let kind = self.profile.kind;
        let previous_id = record.id.clone();
        let snapshot_updated_at = record.updated_at;
        let attempted_at = now_millis();

        let pushed = async {
            self.upload_pending_media(&mut record).await?;
            self.submit(&record).await
        }
        .await;

        let server_id = match pushed {
            Ok(server_id) => server_id,
            Err(error) => {
                tracing::warn!(%kind, record_id = %previous_id, error = %error, "Record sync failed");
                let resolved = record.media;
                self.store
                    .write(|repo| {
                        let Some(mut current) = repo.get(kind, &previous_id)? else {
                            return Ok(());
                        };
                        carry_uploaded_urls(&mut current.media, &resolved, false);
                        current.last_sync_attempt = Some(attempted_at);
                        current.sync_retry_count = current.sync_retry_count.saturating_add(1);
                        repo.upsert(&current)
                    })
                    .await?;
                return Err(error);
            }
        };

        let uploaded = uploaded_local_paths(&record.media);
        let resolved = record.media.clone();
        record.mark_synced(server_id, attempted_at);

        let edited_meanwhile = self
            .store
            .write(|repo| match repo.get(kind, &previous_id)? {
                Some(mut newer) if newer.updated_at > snapshot_updated_at => {
                    // Keep the newer content under the confirmed id
                    carry_uploaded_urls(&mut newer.media, &resolved, true);
                    newer.id = record.id.clone();
                    newer.sync_retry_count = 0;
                    newer.last_sync_attempt = Some(attempted_at);
                    newer.mark_pending();
                    repo.replace_row(&previous_id, &newer)?;
                    Ok(true)
                }
                _ => {
                    repo.replace_row(&previous_id, &record)?;
                    Ok(false)
                }
            })
            .await?;

        self.discard_local_media(&uploaded).await;
        tracing::info!(
            %kind,
            previous_id = %previous_id,
            record_id = %record.id,
            edited_meanwhile,
            "Record synced"
        );
        Ok(())
    }

    /// Informational status over every owner's pending records
    pub async fn status(&self) -> Result<SyncStatusSummary> {
        let kind = self.profile.kind;
        let threshold = self.failed_threshold;
        let row = self
            .store
            .read(|repo| repo.status_summary(kind, None, threshold))
            .await?;
        Ok(SyncStatusSummary {
            total_unsynced: row.total_unsynced,
            failed_count: row.failed_count,
            last_sync_attempt: row.last_sync_attempt,
        })
    }

    pub async fn local_counts(&self, owner: &OwnerId) -> Result<LocalCounts> {
        let kind = self.profile.kind;
        self.store
            .read(|repo| {
                Ok(LocalCounts {
                    cached: repo.count_by_owner(kind, owner)?,
                    unsynced: repo.count_unsynced(kind, owner)?,
                })
            })
            .await
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }
}

#[async_trait]
impl SyncEngine for RecordSync {
    fn kind(&self) -> RecordKind {
        self.profile.kind
    }

    async fn sync_pending(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport> {
        Self::sync_pending(self, owner).await
    }

    async fn sync_pending_waiting(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport> {
        Self::sync_pending_waiting(self, owner).await
    }

    async fn status(&self) -> Result<SyncStatusSummary> {
        Self::status(self).await
    }

    async fn local_counts(&self, owner: &OwnerId) -> Result<LocalCounts> {
        Self::local_counts(self, owner).await
    }

    fn is_running(&self) -> bool {
        Self::is_running(self)
    }
}

/// Local files whose upload is confirmed and can be removed from the device
fn uploaded_local_paths(media: &[MediaRef]) -> Vec<String> {
    media
        .iter()
        .filter(|m| m.remote_url.is_some())
        .filter_map(|m| m.local_path.clone())
        .collect()
}

/// Copy remote URLs resolved on `source` onto matching pending entries of
/// `target`, matched by local path.
fn carry_uploaded_urls(target: &mut [MediaRef], source: &[MediaRef], clear_local: bool) {
    for media in target.iter_mut().filter(|m| m.is_pending_upload()) {
        let resolved = source.iter().find(|candidate| {
            candidate.remote_url.is_some() && candidate.local_path == media.local_path
        });
        if let Some(resolved) = resolved {
            media.remote_url.clone_from(&resolved.remote_url);
            if clear_local {
                media.local_path = None;
            }
        }
    }
}
