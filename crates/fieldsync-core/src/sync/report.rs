//! Inspection report sync: high churn, media attachments, drafts.

use std::sync::Arc;

use tokio::sync::watch;

use super::orchestrator::{
    KindProfile, RecordSync, SyncBatchReport, SyncDeps, SyncEngine, SyncStatusSummary,
};
use crate::models::{MediaRef, OwnerId, Record, RecordId, RecordKind};
use crate::{Error, Result};

const PROFILE: KindProfile = KindProfile {
    kind: RecordKind::Report,
    supports_media: true,
    supports_drafts: true,
};

/// Report orchestrator.
#[derive(Clone)]
pub struct ReportSync {
    inner: Arc<RecordSync>,
}

impl ReportSync {
    pub fn new(deps: SyncDeps) -> Self {
        Self {
            inner: Arc::new(RecordSync::new(PROFILE, deps)),
        }
    }

    /// Kind-erased handle for workers and the manager
    pub fn engine(&self) -> Arc<dyn SyncEngine> {
        self.inner.clone()
    }

    pub async fn create_record(&self, record: Record) -> Result<RecordId> {
        self.inner.create_record(record).await
    }

    pub async fn update_record(&self, record: Record) -> Result<RecordId> {
        self.inner.update_record(record).await
    }

    /// Submit a draft using the normal create rules
    pub async fn promote_draft(&self, id: &RecordId) -> Result<RecordId> {
        self.inner.promote_draft(id).await
    }

    /// Persist captured media on device and attach it to `record`.
    ///
    /// The record is not written; pass it to `create_record` or
    /// `update_record` afterwards.
    pub async fn attach_media(
        &self,
        record: &mut Record,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("media payload is empty".to_string()));
        }
        let mime_type = mime_type.trim();
        if !(mime_type.starts_with("image/") || mime_type.starts_with("video/")) {
            return Err(Error::InvalidInput(format!(
                "unsupported media type '{mime_type}'"
            )));
        }

        let local_path = self.inner.media_store().persist(file_name, bytes).await?;
        tracing::debug!(record_id = %record.id, %local_path, "Attached media");
        record.media.push(MediaRef::local(local_path, mime_type));
        Ok(())
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
