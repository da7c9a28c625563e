//! Background job contract and the scheduler that speaks it.
//!
//! The host substrate (a tokio runtime, a platform job service, a test
//! recorder) only ever sees [`JobSpec`] values; it never reaches into the
//! engines directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::models::{OwnerId, RecordKind};

/// What started a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTrigger {
    /// Recurring run every `interval`, allowed to start up to `flex` early
    Periodic {
        interval: Duration,
        flex: Option<Duration>,
    },
    /// One-off run as soon as constraints allow
    Immediate,
    /// Worker-scheduled follow-up after a batch left failed records
    Retry { attempt: u32 },
}

impl JobTrigger {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Periodic { .. } => "periodic",
            Self::Immediate => "immediate",
            Self::Retry { .. } => "retry",
        }
    }
}

/// Conditions a job waits for before it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobConstraints {
    pub requires_network: bool,
    pub requires_battery_not_low: bool,
}

/// Host-level backoff used when a run reports [`WorkOutcome::Retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Exponential delay before host retry `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(2u32.saturating_pow(exponent))
    }
}

/// What happens when a job with the same unique name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniquenessPolicy {
    /// Leave the existing job alone and drop the request
    Keep,
    /// Supersede the existing job if it has not started yet
    Replace,
}

/// A job request handed to the [`JobHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: RecordKind,
    pub trigger: JobTrigger,
    /// Restrict the run to one owner, `None` for every owner
    pub owner: Option<OwnerId>,
    pub constraints: JobConstraints,
    pub backoff: BackoffPolicy,
    pub uniqueness: UniquenessPolicy,
    /// Delay before the first run
    pub initial_delay: Duration,
}

impl JobSpec {
    /// Name used by hosts to apply the uniqueness policy
    pub fn unique_name(&self) -> String {
        format!("{}-sync-{}", self.kind, self.trigger.label())
    }
}

/// Result of an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Scheduled,
    /// A pending job with the same name was superseded
    Replaced,
    /// An existing job was kept and the request dropped
    KeptExisting,
    /// The host cannot accept work right now
    Unavailable,
}

/// Substrate that stores and runs background jobs.
pub trait JobHost: Send + Sync {
    fn enqueue(&self, spec: JobSpec) -> EnqueueOutcome;

    /// Cancel every job of one kind
    fn cancel(&self, kind: RecordKind);

    fn cancel_all(&self);
}

/// Outcome reported by a job run back to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    /// Ask the host to run this job again after its backoff
    Retry,
    /// Stop this invocation; periodic schedules keep going
    PermanentFailure,
}

/// Body executed by the host for every job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// `run_attempt` counts host retries of this invocation, starting at 0
    async fn run(&self, spec: &JobSpec, run_attempt: u32) -> WorkOutcome;
}

/// Builds job specs from the engine configuration and submits them.
#[derive(Clone)]
pub struct BackgroundScheduler {
    host: Arc<dyn JobHost>,
    config: Arc<EngineConfig>,
}

impl BackgroundScheduler {
    pub fn new(host: Arc<dyn JobHost>, config: Arc<EngineConfig>) -> Self {
        Self { host, config }
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: self.config.host_backoff.initial,
            max_attempts: self.config.host_backoff.max_attempts,
        }
    }

    /// Register the recurring job for `kind`; a no-op when one exists
    pub fn schedule_periodic(&self, kind: RecordKind) -> EnqueueOutcome {
        let schedule = self.config.schedule_for(kind);
        let spec = JobSpec {
            kind,
            trigger: JobTrigger::Periodic {
                interval: schedule.interval,
                flex: schedule.flex,
            },
            owner: None,
            constraints: JobConstraints {
                requires_network: true,
                requires_battery_not_low: schedule.requires_battery_not_low,
            },
            backoff: self.backoff(),
            uniqueness: UniquenessPolicy::Keep,
            initial_delay: Duration::ZERO,
        };
        self.submit(spec)
    }

    /// Ask for a run as soon as the network allows
    pub fn request_immediate(&self, kind: RecordKind, owner: Option<OwnerId>) -> EnqueueOutcome {
        let spec = JobSpec {
            kind,
            trigger: JobTrigger::Immediate,
            owner,
            constraints: JobConstraints {
                requires_network: true,
                requires_battery_not_low: false,
            },
            backoff: self.backoff(),
            uniqueness: UniquenessPolicy::Replace,
            initial_delay: Duration::ZERO,
        };
        self.submit(spec)
    }

    /// Schedule the follow-up run after a batch left failed records.
    ///
    /// `Keep` leaves an already waiting retry job, and its backoff, alone.
    pub fn schedule_retry(
        &self,
        kind: RecordKind,
        owner: Option<OwnerId>,
        attempt: u32,
        uniqueness: UniquenessPolicy,
    ) -> EnqueueOutcome {
        let spec = JobSpec {
            kind,
            trigger: JobTrigger::Retry { attempt },
            owner,
            constraints: JobConstraints {
                requires_network: true,
                requires_battery_not_low: false,
            },
            backoff: self.backoff(),
            uniqueness,
            initial_delay: self.config.retry.delay_for(attempt),
        };
        self.submit(spec)
    }

    pub fn cancel(&self, kind: RecordKind) {
        tracing::info!(%kind, "Cancelling sync jobs");
        self.host.cancel(kind);
    }

    pub fn cancel_all(&self) {
        tracing::info!("Cancelling all sync jobs");
        self.host.cancel_all();
    }

    fn submit(&self, spec: JobSpec) -> EnqueueOutcome {
        let name = spec.unique_name();
        let delay_secs = spec.initial_delay.as_secs();
        let outcome = self.host.enqueue(spec);
        tracing::debug!(job = %name, delay_secs, ?outcome, "Enqueued sync job");
        outcome
    }
}
