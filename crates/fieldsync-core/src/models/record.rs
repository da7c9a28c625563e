//! Record model shared by every synchronized kind

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::MediaRef;

/// Prefix carried by locally generated identifiers until the first sync.
pub const TEMPORARY_ID_PREFIX: &str = "local-";

/// Wall clock in Unix milliseconds, the unit of every record timestamp
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Kind of record tracked by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Inspection report written by an inspector
    Report,
    /// Task assigned to an inspector
    Task,
}

impl RecordKind {
    /// Every kind, in scheduling order
    pub const ALL: [Self; 2] = [Self::Report, Self::Task];

    /// Stable storage/transport name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" | "reports" => Ok(Self::Report),
            "task" | "tasks" => Ok(Self::Task),
            other => Err(Error::InvalidInput(format!("unknown record kind '{other}'"))),
        }
    }
}

/// Sync status of a record relative to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Unsynced,
    Synced,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsynced => "UNSYNCED",
            Self::Synced => "SYNCED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UNSYNCED" => Ok(Self::Unsynced),
            "SYNCED" => Ok(Self::Synced),
            other => Err(Error::LocalStorage(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Identifier of a record.
///
/// Offline-created records carry a temporary `local-<uuid>` value that is
/// replaced by the server-assigned identifier on first successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new temporary identifier using UUID v7 (time-sortable)
    #[must_use]
    pub fn new_temporary() -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Wrap a server-assigned identifier
    pub fn from_server(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(Error::RemoteRejected(
                "remote returned an empty record id".to_string(),
            ));
        }
        if value.starts_with(TEMPORARY_ID_PREFIX) {
            return Err(Error::RemoteRejected(format!(
                "remote returned a temporary-looking id '{value}'"
            )));
        }
        Ok(Self(value))
    }

    /// Whether this id was generated locally and never confirmed remotely
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("record id cannot be empty".to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// Identity of the inspector owning a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("owner id cannot be empty".to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// A versioned unit of domain data owned by exactly one inspector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Temporary or server-assigned identifier
    pub id: RecordId,
    /// Report or task
    pub kind: RecordKind,
    /// Owning inspector
    pub owner_id: OwnerId,
    /// Domain fields, opaque to the sync engine
    pub payload: serde_json::Value,
    /// Attachments
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub sync_status: SyncStatus,
    /// Local content diverges from the last remote-confirmed state
    pub needs_sync: bool,
    /// Most recent reconciliation attempt (Unix ms)
    pub last_sync_attempt: Option<i64>,
    /// Consecutive failed reconciliation attempts
    pub sync_retry_count: u32,
    /// Excluded from automatic sync until promoted
    pub is_draft: bool,
    /// Creation timestamp (Unix ms), drives retention ordering
    pub created_at: i64,
    /// Last local modification (Unix ms)
    pub updated_at: i64,
}

impl Record {
    /// Create a new locally authored record ready for submission
    #[must_use]
    pub fn new(kind: RecordKind, owner_id: OwnerId, payload: serde_json::Value) -> Self {
        let now = now_millis();
        Self {
            id: RecordId::new_temporary(),
            kind,
            owner_id,
            payload,
            media: Vec::new(),
            sync_status: SyncStatus::Unsynced,
            needs_sync: true,
            last_sync_attempt: None,
            sync_retry_count: 0,
            is_draft: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new draft record (never auto-synced)
    #[must_use]
    pub fn draft(kind: RecordKind, owner_id: OwnerId, payload: serde_json::Value) -> Self {
        Self {
            is_draft: true,
            needs_sync: false,
            ..Self::new(kind, owner_id, payload)
        }
    }

    /// Attach media to the record
    #[must_use]
    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }

    /// Whether background reconciliation should pick this record up
    pub const fn is_pending(&self) -> bool {
        matches!(self.sync_status, SyncStatus::Unsynced) && self.needs_sync && !self.is_draft
    }

    /// Whether any attachment still lives only on the device
    pub fn has_pending_media(&self) -> bool {
        self.media.iter().any(MediaRef::is_pending_upload)
    }

    /// Mark the record as confirmed by the remote store under `id`
    pub fn mark_synced(&mut self, id: RecordId, at: i64) {
        self.id = id;
        self.sync_status = SyncStatus::Synced;
        self.needs_sync = false;
        self.is_draft = false;
        self.sync_retry_count = 0;
        self.last_sync_attempt = Some(at);
        for media in &mut self.media {
            if media.remote_url.is_some() {
                media.local_path = None;
            }
        }
    }

    /// Mark the record as locally diverged and waiting for reconciliation
    pub fn mark_pending(&mut self) {
        self.sync_status = SyncStatus::Unsynced;
        self.needs_sync = !self.is_draft;
        self.updated_at = now_millis();
    }

    /// Read a string field from the opaque payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner() -> OwnerId {
        "inspector-1".parse().unwrap()
    }

    #[test]
    fn test_temporary_ids_are_unique_and_marked() {
        let a = RecordId::new_temporary();
        let b = RecordId::new_temporary();
        assert_ne!(a, b);
        assert!(a.is_temporary());
        assert!(a.as_str().starts_with(TEMPORARY_ID_PREFIX));
    }

    #[test]
    fn test_server_id_rejects_empty_and_temporary_values() {
        assert!(RecordId::from_server("  ").is_err());
        assert!(RecordId::from_server("local-abc").is_err());
        let id = RecordId::from_server(" srv-42 ").unwrap();
        assert_eq!(id.as_str(), "srv-42");
        assert!(!id.is_temporary());
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = Record::new(RecordKind::Report, owner(), json!({"title": "Roof"}));
        assert!(record.is_pending());
        assert_eq!(record.sync_status, SyncStatus::Unsynced);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.payload_str("title"), Some("Roof"));
    }

    #[test]
    fn test_draft_is_never_pending() {
        let record = Record::draft(RecordKind::Report, owner(), json!({}));
        assert!(record.is_draft);
        assert!(!record.needs_sync);
        assert!(!record.is_pending());
    }

    #[test]
    fn test_mark_synced_clears_uploaded_local_paths() {
        let mut record = Record::new(RecordKind::Report, owner(), json!({})).with_media(vec![
            MediaRef::remote("https://cdn.example.com/a.jpg", "image/jpeg"),
            MediaRef::local("/tmp/b.jpg", "image/jpeg"),
        ]);
        record.media[1].remote_url = Some("https://cdn.example.com/b.jpg".to_string());
        record.sync_retry_count = 4;

        record.mark_synced(RecordId::from_server("srv-1").unwrap(), 10);

        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.sync_retry_count, 0);
        assert!(!record.needs_sync);
        assert!(record.media.iter().all(|media| media.local_path.is_none()));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Reports".parse::<RecordKind>().unwrap(), RecordKind::Report);
        assert_eq!("task".parse::<RecordKind>().unwrap(), RecordKind::Task);
        assert!("chat".parse::<RecordKind>().is_err());
    }
}
