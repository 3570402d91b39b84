//! Core collection types: errors, schedules and the per-cycle context.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use super::source::SourceError;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that abort the assembly of a batch.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The source could not be reached or refused the query.
    #[error("collector '{name}': source unavailable: {source}")]
    SourceUnavailable {
        name: String,
        #[source]
        source: SourceError,
    },

    /// The query returned no row.
    #[error("collector '{name}': query returned no rows")]
    QueryFailed { name: String },

    /// Two values in one batch share a name.
    #[error("duplicate metric name in batch: {0}")]
    DuplicateName(String),

    /// A required meta column is absent from the batch.
    #[error("batch is missing meta column: {0}")]
    MissingMeta(String),
}

impl CollectionError {
    /// Name of the metric (or meta column) the error concerns.
    pub fn metric_name(&self) -> &str {
        match self {
            Self::SourceUnavailable { name, .. } | Self::QueryFailed { name } => name,
            Self::DuplicateName(name) | Self::MissingMeta(name) => name,
        }
    }
}

/// Errors raised while scheduling source workers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Schedule for source worker execution.
///
/// Supports both fixed interval and cron-based scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between cycles.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression for scheduled execution.
    ///
    /// Uses 6-field cron syntax: `sec min hour day month weekday`.
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `SchedulerError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        use std::str::FromStr;

        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::Config(format!("invalid cron expression: {e}")))?;

        Ok(Self::Cron(expr.to_string()))
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Interval(Duration::from_secs(60))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}

/// State shared by every collector within one cycle.
///
/// The observation instant is taken once so that `dt` is always the date
/// component of `ts` in the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionContext {
    observed_at: DateTime<Utc>,
}

impl CollectionContext {
    pub fn new(observed_at: DateTime<Utc>) -> Self {
        Self { observed_at }
    }

    /// Context observed at the current instant, truncated to whole seconds.
    pub fn now() -> Self {
        let now = Utc::now();
        let truncated = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        Self::new(truncated)
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Observation instant as a naive UTC date-time.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.observed_at.naive_utc()
    }

    /// Observation date (UTC).
    pub fn date(&self) -> NaiveDate {
        self.observed_at.date_naive()
    }
}
