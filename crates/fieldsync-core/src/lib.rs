//! fieldsync-core - Core library for Fieldsync
//!
//! This crate contains the record models, the local durable store, and the
//! offline-first synchronization engine used by field inspection clients:
//! per-kind sync orchestrators, the retention policy, the background
//! scheduler, and the sync manager facade.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod owner;
pub mod remote;
pub mod state;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use connectivity::ConnectivityMonitor;
pub use error::{Error, Result};
pub use models::{MediaRef, OwnerId, Record, RecordId, RecordKind, SyncStatus};
pub use state::SyncState;
