//! Record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{MediaRef, OwnerId, Record, RecordId, RecordKind, SyncStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const RECORD_COLUMNS: &str = "kind, id, owner_id, payload, media, sync_status, needs_sync, \
     last_sync_attempt, sync_retry_count, is_draft, created_at, updated_at";

/// Aggregate sync status for one kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRow {
    /// Records waiting for reconciliation
    pub total_unsynced: usize,
    /// Pending records at or above the failure threshold
    pub failed_count: usize,
    /// Latest attempt across pending records
    pub last_sync_attempt: Option<i64>,
}

/// Trait for record storage operations
pub trait RecordRepository {
    /// Get a record by kind and id
    fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<Record>>;

    /// Insert or fully replace a record row
    fn upsert(&self, record: &Record) -> Result<()>;

    /// Hard delete a record row, returning whether one existed
    fn delete(&self, kind: RecordKind, id: &RecordId) -> Result<bool>;

    /// List an owner's records, newest first
    fn list_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<Vec<Record>>;

    /// List records waiting for reconciliation, oldest first (drafts excluded)
    fn list_pending(&self, kind: RecordKind, owner: Option<&OwnerId>) -> Result<Vec<Record>>;

    /// Count all of an owner's records
    fn count_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<usize>;

    /// Count an owner's records not confirmed by the remote store (drafts included)
    fn count_unsynced(&self, kind: RecordKind, owner: &OwnerId) -> Result<usize>;

    /// Atomically delete the row under `previous_id` and insert `record`
    fn replace_row(&self, previous_id: &RecordId, record: &Record) -> Result<()>;

    /// Summarize pending records for one kind
    fn status_summary(
        &self,
        kind: RecordKind,
        owner: Option<&OwnerId>,
        failed_threshold: u32,
    ) -> Result<StatusRow>;

    /// Delete up to `limit` of an owner's oldest synced rows
    fn delete_oldest_synced(&self, kind: RecordKind, owner: &OwnerId, limit: usize)
        -> Result<usize>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert_row(conn: &Connection, record: &Record) -> Result<()> {
        let media = serde_json::to_string(&record.media)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO records ({RECORD_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                record.kind.as_str(),
                record.id.as_str(),
                record.owner_id.as_str(),
                record.payload,
                media,
                record.sync_status.as_str(),
                record.needs_sync,
                record.last_sync_attempt,
                record.sync_retry_count,
                record.is_draft,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let kind: String = row.get(0)?;
        let id: String = row.get(1)?;
        let owner_id: String = row.get(2)?;
        let media: String = row.get(4)?;
        let sync_status: String = row.get(5)?;

        Ok(Record {
            kind: kind.parse::<RecordKind>().map_err(|e| conversion_error(0, e))?,
            id: id.parse::<RecordId>().map_err(|e| conversion_error(1, e))?,
            owner_id: owner_id.parse::<OwnerId>().map_err(|e| conversion_error(2, e))?,
            payload: row.get(3)?,
            media: serde_json::from_str::<Vec<MediaRef>>(&media)
                .map_err(|e| conversion_error(4, e))?,
            sync_status: sync_status
                .parse::<SyncStatus>()
                .map_err(|e| conversion_error(5, e))?,
            needs_sync: row.get(6)?,
            last_sync_attempt: row.get(7)?,
            sync_retry_count: row.get(8)?,
            is_draft: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE kind = ? AND id = ?"),
                params![kind.as_str(), id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, record: &Record) -> Result<()> {
        Self::insert_row(self.conn, record)
    }

    fn delete(&self, kind: RecordKind, id: &RecordId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE kind = ? AND id = ?",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn list_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM records
             WHERE kind = ? AND owner_id = ?
             ORDER BY created_at DESC, id DESC"
        ))?;

        let records = stmt
            .query_map(params![kind.as_str(), owner.as_str()], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn list_pending(&self, kind: RecordKind, owner: Option<&OwnerId>) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM records
             WHERE kind = ?1
               AND sync_status = 'UNSYNCED'
               AND is_draft = 0
               AND needs_sync = 1
               AND (?2 IS NULL OR owner_id = ?2)
             ORDER BY created_at ASC, id ASC"
        ))?;

        let records = stmt
            .query_map(
                params![kind.as_str(), owner.map(OwnerId::as_str)],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn count_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ? AND owner_id = ?",
            params![kind.as_str(), owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_unsynced(&self, kind: RecordKind, owner: &OwnerId) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM records
             WHERE kind = ? AND owner_id = ? AND (sync_status = 'UNSYNCED' OR needs_sync = 1)",
            params![kind.as_str(), owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn replace_row(&self, previous_id: &RecordId, record: &Record) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM records WHERE kind = ? AND id = ?",
            params![record.kind.as_str(), previous_id.as_str()],
        )?;
        Self::insert_row(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    fn status_summary(
        &self,
        kind: RecordKind,
        owner: Option<&OwnerId>,
        failed_threshold: u32,
    ) -> Result<StatusRow> {
        let row = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN sync_retry_count >= ?3 THEN 1 ELSE 0 END), 0),
                    MAX(last_sync_attempt)
             FROM records
             WHERE kind = ?1
               AND sync_status = 'UNSYNCED'
               AND is_draft = 0
               AND (?2 IS NULL OR owner_id = ?2)",
            params![kind.as_str(), owner.map(OwnerId::as_str), failed_threshold],
            |row| {
                Ok(StatusRow {
                    total_unsynced: row.get(0)?,
                    failed_count: row.get(1)?,
                    last_sync_attempt: row.get(2)?,
                })
            },
        )?;
        Ok(row)
    }

    fn delete_oldest_synced(
        &self,
        kind: RecordKind,
        owner: &OwnerId,
        limit: usize,
    ) -> Result<usize> {
        if limit == 0 {
            return Ok(0);
        }

        let rows = self.conn.execute(
            "DELETE FROM records
             WHERE kind = ?1 AND id IN (
                 SELECT id FROM records
                 WHERE kind = ?1
                   AND owner_id = ?2
                   AND sync_status = 'SYNCED'
                   AND needs_sync = 0
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?3
             )",
            params![kind.as_str(), owner.as_str(), limit as i64],
        )?;
        Ok(rows)
    }
}
