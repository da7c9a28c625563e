//! Remote authoritative store seam.

mod http;

pub use http::HttpRemoteStore;

use async_trait::async_trait;

use crate::models::{MediaRef, OwnerId, Record, RecordId, RecordKind};
use crate::Result;

/// Client for the authoritative backend.
///
/// Transport and timeouts belong to the implementation; every failure is
/// reported as an ordinary `Err` and handled by the caller's retry policy.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record remotely and return the server-assigned id
    async fn create(&self, record: &Record) -> Result<RecordId>;

    /// Update an already created record
    async fn update(&self, record: &Record) -> Result<()>;

    /// Fetch one record, `None` when the backend does not know it
    async fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<Record>>;

    /// Fetch every record of a kind owned by `owner`
    async fn list_by_owner(&self, kind: RecordKind, owner: &OwnerId) -> Result<Vec<Record>>;

    /// Upload a locally stored attachment and return its remote URL
    async fn upload_media(&self, media: &MediaRef) -> Result<String>;
}
