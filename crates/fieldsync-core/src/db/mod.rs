//! Local durable store for Fieldsync

mod connection;
mod migrations;
mod repository;
mod store;

pub use connection::Database;
pub use repository::{RecordRepository, SqliteRecordRepository, StatusRow};
pub use store::LocalStore;
