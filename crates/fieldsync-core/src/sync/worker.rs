//! Job body executed by the host for every sync job.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::orchestrator::SyncEngine;
use super::scheduler::{
    BackgroundScheduler, JobRunner, JobSpec, JobTrigger, UniquenessPolicy, WorkOutcome,
};
use crate::connectivity::ConnectivityMonitor;
use crate::models::RecordKind;

/// Runs `sync_pending` for the job's kind and turns the batch into a
/// [`WorkOutcome`].
pub struct SyncWorker {
    engines: BTreeMap<RecordKind, Arc<dyn SyncEngine>>,
    connectivity: ConnectivityMonitor,
    scheduler: BackgroundScheduler,
    max_run_attempts: u32,
}

impl SyncWorker {
    pub fn new(
        engines: impl IntoIterator<Item = Arc<dyn SyncEngine>>,
        connectivity: ConnectivityMonitor,
        scheduler: BackgroundScheduler,
        max_run_attempts: u32,
    ) -> Self {
        Self {
            engines: engines
                .into_iter()
                .map(|engine| (engine.kind(), engine))
                .collect(),
            connectivity,
            scheduler,
            max_run_attempts,
        }
    }
}

#[async_trait]
impl JobRunner for SyncWorker {
    async fn run(&self, spec: &JobSpec, run_attempt: u32) -> WorkOutcome {
        let kind = spec.kind;
        let trigger = spec.trigger.label();

        if !self.connectivity.is_online() {
            tracing::info!(%kind, trigger, "Network unavailable at run start, retrying later");
            return WorkOutcome::Retry;
        }

        let Some(engine) = self.engines.get(&kind) else {
            tracing::error!(%kind, "No sync engine registered for kind");
            return WorkOutcome::PermanentFailure;
        };

        match engine.sync_pending(spec.owner.as_ref()).await {
            Ok(report) if report.failed > 0 => {
                // A retry job escalates its own chain; other triggers resume
                // from the records' retry counts and never replace a waiting retry
                let (next_attempt, uniqueness) = match spec.trigger {
                    JobTrigger::Retry { attempt } => {
                        (attempt.saturating_add(1), UniquenessPolicy::Replace)
                    }
                    JobTrigger::Periodic { .. } | JobTrigger::Immediate => (
                        report.max_failed_retries.saturating_sub(1),
                        UniquenessPolicy::Keep,
                    ),
                };
                tracing::warn!(
                    %kind,
                    trigger,
                    failed = report.failed,
                    next_attempt,
                    "Sync run left failed records"
                );
                self.scheduler
                    .schedule_retry(kind, spec.owner.clone(), next_attempt, uniqueness);
                WorkOutcome::Success
            }
            Ok(_) => WorkOutcome::Success,
            Err(error) if run_attempt.saturating_add(1) >= self.max_run_attempts => {
                tracing::error!(%kind, trigger, run_attempt, error = %error, "Sync run failed permanently");
                WorkOutcome::PermanentFailure
            }
            Err(error) => {
                tracing::warn!(%kind, trigger, run_attempt, error = %error, "Sync run failed");
                WorkOutcome::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordRepository;
    use crate::models::{OwnerId, Record};
    use crate::sync::scheduler::{BackoffPolicy, JobConstraints};
    use crate::sync::ReportSync;
    use crate::test_support::Harness;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn immediate(kind: RecordKind) -> JobSpec {
        JobSpec {
            kind,
            trigger: JobTrigger::Immediate,
            owner: None,
            constraints: JobConstraints::default(),
            backoff: BackoffPolicy {
                initial: Duration::from_secs(30),
                max_attempts: 5,
            },
            uniqueness: UniquenessPolicy::Replace,
            initial_delay: Duration::ZERO,
        }
    }

    fn owner() -> OwnerId {
        "inspector-1".parse().unwrap()
    }

    #[tokio::test]
    async fn offline_run_retries_without_remote_calls() {
        let harness = Harness::new(false);
        let reports = ReportSync::new(harness.deps());
        reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({})))
            .await
            .unwrap();
        let worker = harness.worker([reports.engine()]);

        let outcome = worker.run(&immediate(RecordKind::Report), 0).await;

        assert_eq!(outcome, WorkOutcome::Retry);
        assert_eq!(harness.remote.calls(), 0);
    }

    #[tokio::test]
    async fn failed_records_schedule_backed_off_retry_job() {
        let harness = Harness::new(false);
        let reports = ReportSync::new(harness.deps());
        reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({ "title": "bad" })))
            .await
            .unwrap();
        harness.remote.fail_title("bad");
        harness.connectivity.set_online(true);
        let worker = harness.worker([reports.engine()]);
        let queued_before = harness.host.specs().len();

        let outcome = worker.run(&immediate(RecordKind::Report), 0).await;

        assert_eq!(outcome, WorkOutcome::Success);
        let retry = harness.host.specs().split_off(queued_before).pop().unwrap();
        assert_eq!(retry.trigger, JobTrigger::Retry { attempt: 0 });
        assert_eq!(retry.uniqueness, UniquenessPolicy::Keep);
        assert_eq!(retry.initial_delay, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn periodic_run_resumes_backoff_from_retry_counts() {
        let harness = Harness::new(true);
        let reports = ReportSync::new(harness.deps());
        harness.remote.fail_title("bad");
        let mut stuck = Record::new(RecordKind::Report, owner(), json!({ "title": "bad" }));
        stuck.sync_retry_count = 4;
        harness.store.write(|repo| repo.upsert(&stuck)).await.unwrap();
        let worker = harness.worker([reports.engine()]);

        let mut escalated = immediate(RecordKind::Report);
        escalated.trigger = JobTrigger::Retry { attempt: 3 };
        worker.run(&escalated, 0).await;
        let mut periodic = immediate(RecordKind::Report);
        periodic.trigger = JobTrigger::Periodic {
            interval: Duration::from_secs(15 * 60),
            flex: None,
        };
        worker.run(&periodic, 0).await;

        let retries: Vec<(JobTrigger, UniquenessPolicy, u64)> = harness
            .host
            .specs()
            .into_iter()
            .map(|spec| (spec.trigger, spec.uniqueness, spec.initial_delay.as_secs()))
            .collect();
        assert_eq!(
            retries,
            vec![
                (JobTrigger::Retry { attempt: 4 }, UniquenessPolicy::Replace, 5 * 60 * 60),
                (JobTrigger::Retry { attempt: 5 }, UniquenessPolicy::Keep, 5 * 60 * 60),
            ]
        );
    }

    #[tokio::test]
    async fn retry_job_escalates_attempt() {
        let harness = Harness::new(true);
        let reports = ReportSync::new(harness.deps());
        harness.remote.fail_title("bad");
        reports
            .create_record(Record::new(RecordKind::Report, owner(), json!({ "title": "bad" })))
            .await
            .unwrap();
        let worker = harness.worker([reports.engine()]);
        let mut spec = immediate(RecordKind::Report);
        spec.trigger = JobTrigger::Retry { attempt: 2 };

        worker.run(&spec, 0).await;

        let retry = harness.host.specs().pop().unwrap();
        assert_eq!(retry.trigger, JobTrigger::Retry { attempt: 3 });
        assert_eq!(retry.initial_delay, Duration::from_secs(4 * 60 * 60));
    }

    #[tokio::test]
    async fn unknown_kind_is_permanent_failure() {
        let harness = Harness::new(true);
        let worker = harness.worker(Vec::<Arc<dyn SyncEngine>>::new());

        let outcome = worker.run(&immediate(RecordKind::Task), 0).await;

        assert_eq!(outcome, WorkOutcome::PermanentFailure);
    }
}
