use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fieldsync_core::media::FsMediaStore;
use fieldsync_core::owner::SessionOwner;
use fieldsync_core::remote::{HttpRemoteStore, RemoteStore};
use fieldsync_core::sync::{
    BackgroundScheduler, JobRunner, ReportSync, SyncDeps, SyncManager, SyncWorker, TaskSync,
    TokioJobHost,
};
use fieldsync_core::db::LocalStore;
use fieldsync_core::{
    ConnectivityMonitor, EngineConfig, MediaRef, OwnerId, Record, RecordId, RecordKind,
    SyncStatus,
};
use serde::Serialize;

use crate::cli::Cli;
use crate::error::CliError;

/// Connection settings resolved from flags and environment.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub owner: Option<String>,
    pub offline: bool,
}

impl EngineOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        let db_path = resolve_db_path(cli.db_path.clone());
        let media_dir = cli
            .media_dir
            .clone()
            .unwrap_or_else(|| default_media_dir(&db_path));
        Self {
            db_path,
            media_dir,
            api_url: non_blank(cli.api_url.clone()),
            token: non_blank(cli.token.clone()),
            owner: non_blank(cli.owner.clone()),
            offline: cli.offline,
        }
    }
}

/// Fully wired engine for one CLI invocation.
pub struct Engine {
    pub reports: ReportSync,
    pub tasks: TaskSync,
    pub manager: SyncManager,
    pub connectivity: ConnectivityMonitor,
    pub remote: Option<Arc<HttpRemoteStore>>,
    pub owner: Option<OwnerId>,
    // Jobs hold the worker weakly; keep it alive for the whole invocation
    _worker: Arc<dyn JobRunner>,
    _host: Arc<TokioJobHost>,
}

impl Engine {
    pub fn require_owner(&self) -> Result<&OwnerId, CliError> {
        self.owner.as_ref().ok_or(CliError::OwnerRequired)
    }

    /// Probe the remote store and publish the result
    pub async fn refresh_connectivity(&self) -> bool {
        let online = match &self.remote {
            Some(remote) => remote.probe().await,
            None => false,
        };
        self.connectivity.set_online(online);
        online
    }
}

pub async fn open_engine(options: &EngineOptions) -> Result<Engine, CliError> {
    let config = Arc::new(EngineConfig::from_env()?);
    let store = LocalStore::open_path(&options.db_path)?;
    let connectivity = ConnectivityMonitor::new(false);

    let remote = match &options.api_url {
        Some(url) => Some(Arc::new(HttpRemoteStore::new(
            url.clone(),
            options.token.clone(),
        )?)),
        None => None,
    };
    let remote_store: Arc<dyn RemoteStore> = match &remote {
        Some(remote) => remote.clone(),
        None => Arc::new(DetachedRemote),
    };

    let owner = options
        .owner
        .as_deref()
        .map(str::parse::<OwnerId>)
        .transpose()?;

    let host = Arc::new(TokioJobHost::new(connectivity.clone()));
    let scheduler = BackgroundScheduler::new(host.clone(), config.clone());
    let deps = SyncDeps {
        store,
        remote: remote_store,
        media: Arc::new(FsMediaStore::new(&options.media_dir)),
        connectivity: connectivity.clone(),
        scheduler: scheduler.clone(),
        config: config.clone(),
    };
    let reports = ReportSync::new(deps.clone());
    let tasks = TaskSync::new(deps);

    let worker: Arc<dyn JobRunner> = Arc::new(SyncWorker::new(
        [reports.engine(), tasks.engine()],
        connectivity.clone(),
        scheduler.clone(),
        config.host_backoff.max_attempts,
    ));
    host.attach_runner(Arc::downgrade(&worker));

    let manager = SyncManager::new(
        vec![reports.engine(), tasks.engine()],
        scheduler,
        connectivity.clone(),
        Arc::new(SessionOwner::new(owner.clone())),
    );

    let engine = Engine {
        reports,
        tasks,
        manager,
        connectivity,
        remote,
        owner,
        _worker: worker,
        _host: host,
    };

    if options.offline {
        tracing::debug!("Offline mode requested, skipping connectivity probe");
    } else {
        engine.refresh_connectivity().await;
    }
    Ok(engine)
}

/// Stand-in remote used when no API URL is configured.
struct DetachedRemote;

#[async_trait]
impl RemoteStore for DetachedRemote {
    async fn create(&self, _record: &Record) -> fieldsync_core::Result<RecordId> {
        Err(fieldsync_core::Error::ConnectivityUnavailable)
    }

    async fn update(&self, _record: &Record) -> fieldsync_core::Result<()> {
        Err(fieldsync_core::Error::ConnectivityUnavailable)
    }

    async fn get(
        &self,
        _kind: RecordKind,
        _id: &RecordId,
    ) -> fieldsync_core::Result<Option<Record>> {
        Err(fieldsync_core::Error::ConnectivityUnavailable)
    }

    async fn list_by_owner(
        &self,
        _kind: RecordKind,
        _owner: &OwnerId,
    ) -> fieldsync_core::Result<Vec<Record>> {
        Err(fieldsync_core::Error::ConnectivityUnavailable)
    }

    async fn upload_media(&self, _media: &MediaRef) -> fieldsync_core::Result<String> {
        Err(fieldsync_core::Error::ConnectivityUnavailable)
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub status: String,
    pub sync: String,
    pub media: usize,
    pub retry_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        kind: record.kind.to_string(),
        title: record_title(record, 80),
        status: record.payload_str("status").unwrap_or("").to_string(),
        sync: sync_label(record).to_string(),
        media: record.media.len(),
        retry_count: record.sync_retry_count,
        created_at: record.created_at,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.id);
            let title = record_title(record, 40);
            let sync = sync_label(record);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            match record.payload_str("status") {
                Some(status) => {
                    format!("{id:<14}  {sync:<8}  {title:<40}  {relative_time:<10}  [{status}]")
                }
                None => format!("{id:<14}  {sync:<8}  {title:<40}  {relative_time}"),
            }
        })
        .collect()
}

pub const fn sync_label(record: &Record) -> &'static str {
    if record.is_draft {
        "draft"
    } else if matches!(record.sync_status, SyncStatus::Synced) && !record.needs_sync {
        "synced"
    } else {
        "pending"
    }
}

/// Temporary ids share a long prefix, so show their random tail instead
pub fn short_id(id: &RecordId) -> String {
    let value = id.as_str();
    if id.is_temporary() {
        let skip = value.chars().count().saturating_sub(8);
        format!("~{}", value.chars().skip(skip).collect::<String>())
    } else {
        value.chars().take(14).collect()
    }
}

pub fn record_title(record: &Record, max_chars: usize) -> String {
    let title = record
        .payload_str("title")
        .map(|title| title.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "(untitled)".to_string());

    if title.chars().count() <= max_chars {
        title
    } else {
        let mut truncated = title
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Trimmed flag or field value, `None` when blank
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    non_blank(Some(parts.join(" "))).ok_or(CliError::EmptyTitle)
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    id.trim()
        .parse::<RecordId>()
        .map_err(|_| CliError::EmptyRecordId)
}

/// MIME type for a captured media file; only images and video are accepted
pub fn guess_mime_type(path: &Path) -> Result<String, CliError> {
    mime_guess::from_path(path)
        .first()
        .filter(|mime| matches!(mime.type_().as_str(), "image" | "video"))
        .map(|mime| mime.essence_str().to_string())
        .ok_or_else(|| CliError::UnsupportedMedia(path.display().to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join("fieldsync.db")
}

pub fn default_media_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map_or_else(|| PathBuf::from("media"), |parent| parent.join("media"))
}
