//! Engine configuration.
//!
//! Defaults match the production schedule; every value can be overridden
//! from `FIELDSYNC_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RecordKind;

const DEFAULT_RETAIN_BASE: usize = 30;
const DEFAULT_FAILED_RETRY_THRESHOLD: u32 = 3;
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_TASK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_TASK_FLEX: Duration = Duration::from_secs(60 * 60);
const DEFAULT_RETRY_FLOOR: Duration = Duration::from_secs(30 * 60);
const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(5 * 60 * 60);
const DEFAULT_HOST_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_HOST_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Recurring reconciliation schedule for one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    /// Period between runs
    pub interval: Duration,
    /// Window before the period end in which the run may start early
    pub flex: Option<Duration>,
    /// Skip runs while the device reports a critical battery
    pub requires_battery_not_low: bool,
}

/// Backoff for the worker-scheduled retry job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Minimum delay before the first retry
    pub floor: Duration,
    /// Upper bound for the exponential delay
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `floor * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.floor.saturating_mul(factor).min(self.max)
    }
}

/// Host-level backoff applied when a run reports `Retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBackoff {
    pub initial: Duration,
    pub max_attempts: u32,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Synced records kept per owner and kind, on top of every unsynced one
    pub retain_base: usize,
    /// Retry count from which a pending record is reported as failed
    pub failed_retry_threshold: u32,
    pub report_schedule: PeriodicSchedule,
    pub task_schedule: PeriodicSchedule,
    pub retry: RetryPolicy,
    pub host_backoff: HostBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retain_base: DEFAULT_RETAIN_BASE,
            failed_retry_threshold: DEFAULT_FAILED_RETRY_THRESHOLD,
            report_schedule: PeriodicSchedule {
                interval: DEFAULT_REPORT_INTERVAL,
                flex: None,
                requires_battery_not_low: false,
            },
            task_schedule: PeriodicSchedule {
                interval: DEFAULT_TASK_INTERVAL,
                flex: Some(DEFAULT_TASK_FLEX),
                requires_battery_not_low: true,
            },
            retry: RetryPolicy {
                floor: DEFAULT_RETRY_FLOOR,
                max: DEFAULT_RETRY_MAX,
            },
            host_backoff: HostBackoff {
                initial: DEFAULT_HOST_BACKOFF,
                max_attempts: DEFAULT_HOST_MAX_ATTEMPTS,
            },
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(retain_base) = parse_optional::<usize>(&lookup, "FIELDSYNC_RETAIN_BASE")? {
            config.retain_base = retain_base;
        }
        if let Some(secs) = parse_positive_secs(&lookup, "FIELDSYNC_REPORT_INTERVAL_SECS")? {
            config.report_schedule.interval = secs;
        }
        if let Some(secs) = parse_positive_secs(&lookup, "FIELDSYNC_TASK_INTERVAL_SECS")? {
            config.task_schedule.interval = secs;
        }
        if let Some(secs) = parse_optional::<u64>(&lookup, "FIELDSYNC_TASK_FLEX_SECS")? {
            config.task_schedule.flex = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_positive_secs(&lookup, "FIELDSYNC_RETRY_FLOOR_SECS")? {
            config.retry.floor = secs;
        }
        if let Some(secs) = parse_positive_secs(&lookup, "FIELDSYNC_RETRY_MAX_SECS")? {
            config.retry.max = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Periodic schedule for a record kind
    pub const fn schedule_for(&self, kind: RecordKind) -> PeriodicSchedule {
        match kind {
            RecordKind::Report => self.report_schedule,
            RecordKind::Task => self.task_schedule,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max < self.retry.floor {
            return Err(ConfigError::Invalid(
                "FIELDSYNC_RETRY_MAX_SECS must be >= FIELDSYNC_RETRY_FLOOR_SECS".to_string(),
            ));
        }
        for kind in RecordKind::ALL {
            let schedule = self.schedule_for(kind);
            if schedule.flex.is_some_and(|flex| flex >= schedule.interval) {
                return Err(ConfigError::Invalid(format!(
                    "{kind} flex window must be shorter than its interval"
                )));
            }
        }
        Ok(())
    }
}

fn parse_optional<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("{name} has invalid value '{raw}'")))
}

fn parse_positive_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match parse_optional::<u64>(lookup, name)? {
        Some(0) => Err(ConfigError::Invalid(format!("{name} must be greater than 0"))),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}
