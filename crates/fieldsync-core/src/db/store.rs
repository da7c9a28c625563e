//! Shared local store handle used by the sync engine and its hosts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::{Database, SqliteRecordRepository};
use crate::Result;

/// Thread-safe handle over the local durable store.
///
/// All access is serialized through one connection; every successful write
/// bumps a revision counter that observers can subscribe to.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    revision: Arc<watch::Sender<u64>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            revision: Arc::new(revision),
        }
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run a read-only repository operation.
    pub async fn read<T>(
        &self,
        op: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        op(&repo)
    }

    /// Run a mutating repository operation and notify observers on success.
    pub async fn write<T>(
        &self,
        op: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>,
    ) -> Result<T> {
        let value = {
            let db = self.db.lock().await;
            let repo = SqliteRecordRepository::new(db.connection());
            op(&repo)?
        };
        self.revision.send_modify(|revision| *revision += 1);
        Ok(value)
    }

    /// Subscribe to local write notifications.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordRepository;
    use crate::models::{Record, RecordKind};
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_write_and_read_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = Record::new(RecordKind::Report, "o1".parse().unwrap(), json!({}));

        store.write(|repo| repo.upsert(&record)).await.unwrap();
        let fetched = store
            .read(|repo| repo.get(RecordKind::Report, &record.id))
            .await
            .unwrap();
        assert_eq!(fetched, Some(record));
    }

    #[tokio::test]
    async fn writes_bump_revision_but_failed_writes_do_not() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut revisions = store.subscribe();
        let record = Record::new(RecordKind::Task, "o1".parse().unwrap(), json!({}));

        store.write(|repo| repo.upsert(&record)).await.unwrap();
        assert!(revisions.has_changed().unwrap());
        assert_eq!(*revisions.borrow_and_update(), 1);

        let failed: Result<()> = store
            .write(|_| Err(crate::Error::LocalStorage("boom".to_string())))
            .await;
        assert!(failed.is_err());
        assert!(!revisions.has_changed().unwrap());
    }

    #[test]
    fn open_path_reports_location() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fieldsync.db");
        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
    }
}
