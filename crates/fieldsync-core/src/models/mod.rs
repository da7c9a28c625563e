//! Data models for Fieldsync

mod media_ref;
mod record;

pub use media_ref::MediaRef;
pub(crate) use record::now_millis;
pub use record::{OwnerId, Record, RecordId, RecordKind, SyncStatus, TEMPORARY_ID_PREFIX};
