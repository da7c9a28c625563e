//! Assigned task sync: low churn, no media, no drafts.

use std::sync::Arc;

use tokio::sync::watch;

use super::orchestrator::{
    KindProfile, RecordSync, SyncBatchReport, SyncDeps, SyncEngine, SyncStatusSummary,
};
use crate::models::{OwnerId, Record, RecordId, RecordKind};
use crate::{Error, Result};

const PROFILE: KindProfile = KindProfile {
    kind: RecordKind::Task,
    supports_media: false,
    supports_drafts: false,
};

#[derive(Clone)]
pub struct TaskSync {
    inner: Arc<RecordSync>,
}

impl TaskSync {
    pub fn new(deps: SyncDeps) -> Self {
        Self {
            inner: Arc::new(RecordSync::new(PROFILE, deps)),
        }
    }

    pub fn engine(&self) -> Arc<dyn SyncEngine> {
        self.inner.clone()
    }

    pub async fn create_record(&self, record: Record) -> Result<RecordId> {
        self.inner.create_record(record).await
    }

    pub async fn update_record(&self, record: Record) -> Result<RecordId> {
        self.inner.update_record(record).await
    }

    /// Set the task's `status` payload field and submit the edit
    pub async fn update_status(&self, id: &RecordId, status: &str) -> Result<RecordId> {
        let status = status.trim();
        if status.is_empty() {
            return Err(Error::InvalidInput("task status cannot be empty".to_string()));
        }

        let mut record = self
            .inner
            .fetch_record(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        let Some(fields) = record.payload.as_object_mut() else {
            return Err(Error::InvalidInput(format!(
                "task {id} payload is not an object"
            )));
        };
        fields.insert("status".to_string(), serde_json::Value::String(status.to_string()));
        self.inner.update_record(record).await
    }

    pub async fn fetch_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.inner.fetch_record(id).await
    }

    pub async fn fetch_by_owner(&self, owner: &OwnerId) -> Result<Vec<Record>> {
        self.inner.fetch_by_owner(owner).await
    }

    pub async fn refresh_by_owner(&self, owner: &OwnerId) -> Result<Vec<Record>> {
        self.inner.refresh_by_owner(owner).await
    }

    pub fn observe_by_owner(&self, owner: OwnerId) -> watch::Receiver<Vec<Record>> {
        self.inner.observe_by_owner(owner)
    }

    pub async fn sync_pending(&self, owner: Option<&OwnerId>) -> Result<SyncBatchReport> {
        self.inner.sync_pending(owner).await
    }

    pub async fn status(&self) -> Result<SyncStatusSummary> {
        self.inner.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;
    use crate::test_support::{remote_record, Harness};
    use serde_json::json;

    fn owner() -> OwnerId {
        "inspector-1".parse().unwrap()
    }

    #[tokio::test]
    async fn drafts_are_rejected() {
        let harness = Harness::new(false);
        let tasks = TaskSync::new(harness.deps());

        let err = tasks
            .create_record(Record::draft(RecordKind::Task, owner(), json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn update_status_offline_marks_synced_task_pending() {
        let harness = Harness::new(true);
        harness.remote.seed(remote_record(
            RecordKind::Task,
            "task-7",
            &owner(),
            json!({ "title": "Inspect boiler", "status": "assigned" }),
        ));
        let tasks = TaskSync::new(harness.deps());
        let listed = tasks.fetch_by_owner(&owner()).await.unwrap();
        assert_eq!(listed.len(), 1);

        harness.connectivity.set_online(false);
        let id = listed[0].id.clone();
        tasks.update_status(&id, " done ").await.unwrap();

        let row = tasks.fetch_record(&id).await.unwrap().unwrap();
        assert_eq!(row.payload_str("status"), Some("done"));
        assert_eq!(row.sync_status, SyncStatus::Unsynced);
        assert!(row.needs_sync);
        assert_eq!(harness.host.immediate_count(RecordKind::Task), 1);
    }

    #[tokio::test]
    async fn update_status_of_unknown_task_is_not_found() {
        let harness = Harness::new(false);
        let tasks = TaskSync::new(harness.deps());

        let err = tasks
            .update_status(&"task-404".parse().unwrap(), "done")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_status_rejects_blank_status() {
        let harness = Harness::new(false);
        let tasks = TaskSync::new(harness.deps());

        let err = tasks
            .update_status(&"task-1".parse().unwrap(), "   ")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
