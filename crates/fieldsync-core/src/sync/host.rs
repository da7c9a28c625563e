//! In-process job host backed by the tokio runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::scheduler::{
    EnqueueOutcome, JobConstraints, JobHost, JobRunner, JobSpec, JobTrigger, UniquenessPolicy,
    WorkOutcome,
};
use crate::connectivity::ConnectivityMonitor;
use crate::models::RecordKind;

struct ScheduledJob {
    kind: RecordKind,
    handle: JoinHandle<()>,
    started: Arc<AtomicBool>,
}

impl ScheduledJob {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Runs jobs as tokio tasks, waiting for their constraints and applying the
/// host backoff when a run asks for a retry.
pub struct TokioJobHost {
    runner: RwLock<Option<Weak<dyn JobRunner>>>,
    connectivity: ConnectivityMonitor,
    battery_low: Option<watch::Receiver<bool>>,
    jobs: Mutex<HashMap<String, Vec<ScheduledJob>>>,
}

impl TokioJobHost {
    pub fn new(connectivity: ConnectivityMonitor) -> Self {
        Self {
            runner: RwLock::new(None),
            connectivity,
            battery_low: None,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Gate battery-constrained jobs on a "battery is low" signal
    #[must_use]
    pub fn with_battery_signal(mut self, battery_low: watch::Receiver<bool>) -> Self {
        self.battery_low = Some(battery_low);
        self
    }

    /// Set the job body. Held weakly so the runner can own the scheduler.
    pub fn attach_runner(&self, runner: Weak<dyn JobRunner>) {
        *self
            .runner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(runner);
    }

    /// Unique names of jobs that have not finished
    pub fn active_jobs(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut jobs);
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    fn spawn(&self, spec: JobSpec) -> Option<ScheduledJob> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let runner = self
            .runner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;

        let started = Arc::new(AtomicBool::new(false));
        let job = JobTask {
            spec: spec.clone(),
            runner,
            connectivity: self.connectivity.clone(),
            battery_low: self.battery_low.clone(),
            started: Arc::clone(&started),
        };
        let handle = runtime.spawn(job.drive());

        Some(ScheduledJob {
            kind: spec.kind,
            handle,
            started,
        })
    }
}

fn prune(jobs: &mut HashMap<String, Vec<ScheduledJob>>) {
    for entries in jobs.values_mut() {
        entries.retain(ScheduledJob::is_live);
    }
    jobs.retain(|_, entries| !entries.is_empty());
}

impl JobHost for TokioJobHost {
    fn enqueue(&self, spec: JobSpec) -> EnqueueOutcome {
        let name = spec.unique_name();
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut jobs);

        let mut replaced = false;
        if let Some(existing) = jobs.get_mut(&name) {
            match spec.uniqueness {
                UniquenessPolicy::Keep => return EnqueueOutcome::KeptExisting,
                UniquenessPolicy::Replace => {
                    // A run already in progress finishes; only waiting jobs are superseded
                    existing.retain(|job| {
                        if job.started.load(Ordering::SeqCst) {
                            true
                        } else {
                            job.handle.abort();
                            replaced = true;
                            false
                        }
                    });
                }
            }
        }

        let Some(job) = self.spawn(spec) else {
            tracing::warn!(job = %name, "Job host has no runtime or runner, dropping job");
            return EnqueueOutcome::Unavailable;
        };
        jobs.entry(name).or_default().push(job);

        if replaced {
            EnqueueOutcome::Replaced
        } else {
            EnqueueOutcome::Scheduled
        }
    }

    fn cancel(&self, kind: RecordKind) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for entries in jobs.values_mut() {
            entries.retain(|job| {
                if job.kind == kind {
                    job.handle.abort();
                    false
                } else {
                    true
                }
            });
        }
        prune(&mut jobs);
    }

    fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for job in jobs.drain().flat_map(|(_, entries)| entries) {
            job.handle.abort();
        }
    }
}

impl Drop for TokioJobHost {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// State moved into one spawned job.
struct JobTask {
    spec: JobSpec,
    runner: Weak<dyn JobRunner>,
    connectivity: ConnectivityMonitor,
    battery_low: Option<watch::Receiver<bool>>,
    started: Arc<AtomicBool>,
}

impl JobTask {
    async fn drive(mut self) {
        if !self.spec.initial_delay.is_zero() {
            tokio::time::sleep(self.spec.initial_delay).await;
        }

        match self.spec.trigger {
            JobTrigger::Periodic { interval, flex } => {
                let pause = flex.map_or(interval, |flex| interval.saturating_sub(flex));
                loop {
                    if !self.run_with_backoff().await {
                        return;
                    }
                    self.started.store(false, Ordering::SeqCst);
                    tokio::time::sleep(pause).await;
                }
            }
            JobTrigger::Immediate | JobTrigger::Retry { .. } => {
                self.run_with_backoff().await;
            }
        }
    }

    /// Run once, retrying per the backoff policy. Returns false once the
    /// runner is gone.
    async fn run_with_backoff(&mut self) -> bool {
        let name = self.spec.unique_name();
        let mut attempt = 0;
        loop {
            self.wait_for_constraints().await;
            self.started.store(true, Ordering::SeqCst);

            let Some(runner) = self.runner.upgrade() else {
                tracing::debug!(job = %name, "Runner dropped, stopping job");
                return false;
            };
            let outcome = runner.run(&self.spec, attempt).await;
            drop(runner);

            match outcome {
                WorkOutcome::Success => return true,
                WorkOutcome::PermanentFailure => {
                    tracing::warn!(job = %name, attempt, "Job failed permanently");
                    return true;
                }
                WorkOutcome::Retry => {
                    attempt += 1;
                    if attempt >= self.spec.backoff.max_attempts {
                        tracing::warn!(job = %name, attempt, "Job retries exhausted");
                        return true;
                    }
                    let delay = self.spec.backoff.delay_for(attempt);
                    tracing::debug!(job = %name, attempt, delay_secs = delay.as_secs(), "Job backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn wait_for_constraints(&mut self) {
        let JobConstraints {
            requires_network,
            requires_battery_not_low,
        } = self.spec.constraints;

        if requires_network {
            self.connectivity.wait_until_online().await;
        }
        if requires_battery_not_low {
            if let Some(battery_low) = self.battery_low.as_mut() {
                let _ = battery_low.wait_for(|low| !*low).await;
            }
        }
    }
}
