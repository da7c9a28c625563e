//! Scripted collaborators shared by the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::LocalStore;
use crate::media::MediaStore;
use crate::models::{MediaRef, OwnerId, Record, RecordId, RecordKind};
use crate::remote::RemoteStore;
use crate::sync::{
    BackgroundScheduler, EnqueueOutcome, JobHost, JobSpec, JobTrigger, KindProfile, RecordSync,
    SyncDeps, SyncEngine, SyncWorker,
};
use crate::{Error, Result};

/// A record as the backend would return it
pub fn remote_record(
    kind: RecordKind,
    id: &str,
    owner: &OwnerId,
    payload: serde_json::Value,
) -> Record {
    let mut record = Record::new(kind, owner.clone(), payload);
    record.mark_synced(RecordId::from_server(id).unwrap(), record.created_at);
    record
}

#[derive(Default)]
struct RemoteState {
    next_id: u64,
    creates: usize,
    updates: usize,
    gets: usize,
    lists: usize,
    uploads: usize,
    failing_titles: HashSet<String>,
    fail_all: bool,
    fail_uploads: bool,
    records: HashMap<(RecordKind, RecordId), Record>,
}

/// Holds remote creates until released, so a test can act mid-run.
pub struct CreateGate {
    /// Signalled when a create reaches the gate
    pub entered: Notify,
    release: Semaphore,
}

impl CreateGate {
    /// Let every held and future create through
    pub fn release(&self) {
        self.release.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

/// In-memory backend with per-record failure injection and call counters.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    gate: Mutex<Option<Arc<CreateGate>>>,
}

impl FakeRemote {
    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    /// Reject creates and updates of records whose payload title matches
    pub fn fail_title(&self, title: &str) {
        self.state().failing_titles.insert(title.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.state().fail_all = fail;
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    pub fn seed(&self, record: Record) {
        self.state()
            .records
            .insert((record.kind, record.id.clone()), record);
    }

    /// Hold creates at a gate until the returned handle is released
    pub fn gate_creates(&self) -> Arc<CreateGate> {
        let gate = Arc::new(CreateGate {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn updates(&self) -> usize {
        self.state().updates
    }

    pub fn uploads(&self) -> usize {
        self.state().uploads
    }

    /// Every call of any kind
    pub fn calls(&self) -> usize {
        let state = self.state();
        state.creates + state.updates + state.gets + state.lists + state.uploads
    }

    fn check_write(state: &RemoteState, record: &Record) -> Result<()> {
        let title_fails = record
            .payload_str("title")
            .is_some_and(|title| state.failing_titles.contains(title));
        if state.fail_all || title_fails {
            return Err(Error::RemoteRejected(format!(
                "backend refused {}",
                record.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn create(&self, record: &Record) -> Result<RecordId> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            drop(gate.release.acquire().await.unwrap());
        }

        let mut state = self.state();
        state.creates += 1;
        Self::check_write(&state, record)?;

        state.next_id += 1;
        let id = RecordId::from_server(format!("srv-{}", state.next_id))?;
        let mut stored = record.clone();
        stored.id = id.clone();
        state.records.insert((record.kind, id.clone()), stored);
        Ok(id)
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let mut state = self.state();
        state.updates += 1;
        Self::check_write(&state, record)?;
        state
            .records
            .insert((record.kind, record.id.clone()), record.clone());
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<Record>> {
        let mut state = self.state();
        state.gets += 1;
        Ok(state.records.get(&(kind, id.clone())).cloned())
    }

    async fn list_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<Vec<Record>> {
        let mut state = self.state();
        state.lists += 1;
        if state.fail_all {
            return Err(Error::RemoteRejected("backend unavailable".to_string()));
        }
        Ok(state
            .records
            .values()
            .filter(|record| record.kind == kind && &record.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn upload_media(&self, media: &MediaRef) -> Result<String> {
        let mut state = self.state();
        state.uploads += 1;
        if state.fail_uploads {
            return Err(Error::MediaUpload("upload refused".to_string()));
        }
        Ok(format!(
            "https://media.test/{}-{}",
            state.uploads,
            media.mime_type.replace('/', "-")
        ))
    }
}

/// Media store keeping bytes in memory.
#[derive(Default)]
pub struct MemoryMediaStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn persist(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let mut files = self.files.lock().unwrap();
        let path = format!("mem://{}/{file_name}", files.len());
        files.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn delete(&self, local_path: &str) -> Result<()> {
        self.files.lock().unwrap().remove(local_path);
        Ok(())
    }

    async fn exists(&self, local_path: &str) -> bool {
        self.files.lock().unwrap().contains_key(local_path)
    }
}

/// Job host that records requests instead of running them.
#[derive(Default)]
pub struct RecordingHost {
    specs: Mutex<Vec<JobSpec>>,
    cancel_all_calls: Mutex<usize>,
}

impl RecordingHost {
    pub fn specs(&self) -> Vec<JobSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn immediate_count(&self, kind: RecordKind) -> usize {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.kind == kind && spec.trigger == JobTrigger::Immediate)
            .count()
    }

    pub fn cancel_all_calls(&self) -> usize {
        *self.cancel_all_calls.lock().unwrap()
    }
}

impl JobHost for RecordingHost {
    fn enqueue(&self, spec: JobSpec) -> EnqueueOutcome {
        self.specs.lock().unwrap().push(spec);
        EnqueueOutcome::Scheduled
    }

    fn cancel(&self, kind: RecordKind) {
        self.specs.lock().unwrap().retain(|spec| spec.kind != kind);
    }

    fn cancel_all(&self) {
        *self.cancel_all_calls.lock().unwrap() += 1;
    }
}

/// Engine wiring over an in-memory store and the fakes above.
pub struct Harness {
    pub store: LocalStore,
    pub remote: Arc<FakeRemote>,
    pub media: Arc<MemoryMediaStore>,
    pub host: Arc<RecordingHost>,
    pub connectivity: ConnectivityMonitor,
    pub scheduler: BackgroundScheduler,
    pub config: Arc<EngineConfig>,
}

impl Harness {
    pub fn new(online: bool) -> Self {
        let config = Arc::new(EngineConfig::default());
        let host = Arc::new(RecordingHost::default());
        Self {
            store: LocalStore::open_in_memory().unwrap(),
            remote: Arc::new(FakeRemote::default()),
            media: Arc::new(MemoryMediaStore::default()),
            scheduler: BackgroundScheduler::new(host.clone(), config.clone()),
            host,
            connectivity: ConnectivityMonitor::new(online),
            config,
        }
    }

    pub fn deps(&self) -> SyncDeps {
        SyncDeps {
            store: self.store.clone(),
            remote: self.remote.clone(),
            media: self.media.clone(),
            connectivity: self.connectivity.clone(),
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
        }
    }

    pub fn record_sync(&self, profile: KindProfile) -> RecordSync {
        RecordSync::new(profile, self.deps())
    }

    pub fn worker(&self, engines: impl IntoIterator<Item = Arc<dyn SyncEngine>>) -> SyncWorker {
        SyncWorker::new(
            engines,
            self.connectivity.clone(),
            self.scheduler.clone(),
            self.config.host_backoff.max_attempts,
        )
    }
}
