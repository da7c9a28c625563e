//! Bounded local cache per owner.

use crate::db::RecordRepository;
use crate::models::{OwnerId, RecordKind};
use crate::Result;

/// Keeps at most `retain_base` synced records per owner and kind, on top of
/// every unsynced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    retain_base: usize,
}

impl RetentionPolicy {
    pub const fn new(retain_base: usize) -> Self {
        Self { retain_base }
    }

    pub const fn retain_base(&self) -> usize {
        self.retain_base
    }

    pub const fn retain_count(&self, unsynced: usize) -> usize {
        self.retain_base.saturating_add(unsynced)
    }

    /// Delete the owner's oldest synced records until at most `retain_count`
    /// remain. Records awaiting sync are never candidates.
    pub fn trim(
        &self,
        repo: &impl RecordRepository,
        kind: RecordKind,
        owner: &OwnerId,
        retain_count: usize,
    ) -> Result<usize> {
        let total = repo.count_by_owner(kind, owner)?;
        if total <= retain_count {
            return Ok(0);
        }

        let deleted = repo.delete_oldest_synced(kind, owner, total - retain_count)?;
        if deleted > 0 {
            tracing::debug!(%kind, owner_id = %owner, deleted, retain_count, "Trimmed local cache");
        }
        Ok(deleted)
    }

    /// Trim with `retain_count = retain_base + current unsynced count`
    pub fn apply(
        &self,
        repo: &impl RecordRepository,
        kind: RecordKind,
        owner: &OwnerId,
    ) -> Result<usize> {
        let unsynced = repo.count_unsynced(kind, owner)?;
        self.trim(repo, kind, owner, self.retain_count(unsynced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteRecordRepository};
    use crate::models::{Record, RecordId, SyncStatus};
    use serde_json::json;

    fn owner(name: &str) -> OwnerId {
        name.parse().unwrap()
    }

    fn seed(repo: &SqliteRecordRepository<'_>, owner_id: &OwnerId, synced: usize, unsynced: usize) {
        for i in 0..synced {
            let mut record = Record::new(RecordKind::Report, owner_id.clone(), json!({}));
            record.mark_synced(RecordId::from_server(format!("srv-{owner_id}-{i}")).unwrap(), 0);
            record.created_at = i64::try_from(i).unwrap();
            repo.upsert(&record).unwrap();
        }
        for i in 0..unsynced {
            let mut record = Record::new(RecordKind::Report, owner_id.clone(), json!({}));
            // Older than every synced row so age alone would pick them first
            record.created_at = -1 - i64::try_from(i).unwrap();
            repo.upsert(&record).unwrap();
        }
    }

    fn synced_count(repo: &SqliteRecordRepository<'_>, owner_id: &OwnerId) -> usize {
        repo.list_by_owner(RecordKind::Report, owner_id)
            .unwrap()
            .iter()
            .filter(|record| record.sync_status == SyncStatus::Synced)
            .count()
    }

    #[test]
    fn trim_bounds_synced_rows_and_keeps_every_unsynced_row() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(db.connection());
        let policy = RetentionPolicy::new(30);
        let o1 = owner("o1");
        seed(&repo, &o1, 40, 7);

        let unsynced_before = repo.count_unsynced(RecordKind::Report, &o1).unwrap();
        let deleted = policy
            .trim(&repo, RecordKind::Report, &o1, policy.retain_count(7))
            .unwrap();

        assert_eq!(deleted, 10);
        assert_eq!(synced_count(&repo, &o1), 30);
        assert_eq!(
            repo.count_unsynced(RecordKind::Report, &o1).unwrap(),
            unsynced_before
        );
    }

    #[test]
    fn trim_deletes_oldest_synced_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(db.connection());
        let o1 = owner("o1");
        seed(&repo, &o1, 5, 0);

        RetentionPolicy::new(2).apply(&repo, RecordKind::Report, &o1).unwrap();

        let remaining: Vec<String> = repo
            .list_by_owner(RecordKind::Report, &o1)
            .unwrap()
            .into_iter()
            .map(|record| record.id.to_string())
            .collect();
        assert_eq!(remaining, vec!["srv-o1-4", "srv-o1-3"]);
    }

    #[test]
    fn trim_never_drops_unsynced_even_past_the_bound() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(db.connection());
        let o1 = owner("o1");
        seed(&repo, &o1, 0, 12);

        let deleted = RetentionPolicy::new(3)
            .trim(&repo, RecordKind::Report, &o1, 3)
            .unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(repo.count_unsynced(RecordKind::Report, &o1).unwrap(), 12);
    }

    #[test]
    fn trim_is_scoped_to_one_owner() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRecordRepository::new(db.connection());
        let (o1, o2) = (owner("o1"), owner("o2"));
        seed(&repo, &o1, 6, 0);
        seed(&repo, &o2, 6, 0);

        RetentionPolicy::new(2).apply(&repo, RecordKind::Report, &o1).unwrap();

        assert_eq!(synced_count(&repo, &o1), 2);
        assert_eq!(synced_count(&repo, &o2), 6);
    }
}
