//! Offline-first synchronization engine.
//!
//! One [`RecordSync`] per record kind owns the write, read and
//! reconciliation paths. The [`BackgroundScheduler`] turns triggers into job
//! specs for a [`JobHost`], whose runs land in [`SyncWorker`]. The
//! [`SyncManager`] is the facade used by application shells.

mod host;
mod manager;
mod orchestrator;
mod report;
mod retention;
pub(crate) mod scheduler;
mod task;
mod worker;

pub use host::TokioJobHost;
pub use manager::{FullSyncOutcome, OfflineDataInfo, SyncManager};
pub use orchestrator::{
    KindProfile, LocalCounts, RecordSync, SyncBatchReport, SyncDeps, SyncEngine,
    SyncStatusSummary,
};
pub use report::ReportSync;
pub use retention::RetentionPolicy;
pub use scheduler::{
    BackgroundScheduler, BackoffPolicy, EnqueueOutcome, JobConstraints, JobHost, JobRunner,
    JobSpec, JobTrigger, UniquenessPolicy, WorkOutcome,
};
pub use task::TaskSync;
pub use worker::SyncWorker;
