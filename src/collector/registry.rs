//! Registry scheduling one worker per monitored database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::collector::{Schedule, SchedulerError, Source};
use crate::pipeline::{CycleReport, Pipeline, SourceTarget};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// Source name.
    pub name: String,
    /// Schedule description.
    pub schedule: String,
}

/// Runs pipeline cycles for one source, never two at once.
pub struct SourceWorker {
    target: SourceTarget,
    source: Arc<dyn Source>,
    pipeline: Arc<Pipeline>,
    schedule: Schedule,
    running: Mutex<()>,
}

impl std::fmt::Debug for SourceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWorker")
            .field("target", &self.target)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl SourceWorker {
    pub fn new(
        target: SourceTarget,
        source: Arc<dyn Source>,
        pipeline: Arc<Pipeline>,
        schedule: Schedule,
    ) -> Self {
        Self {
            target,
            source,
            pipeline,
            schedule,
            running: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn target(&self) -> &SourceTarget {
        &self.target
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Run one cycle. Returns `None` if the previous cycle is still running.
    pub async fn run_once(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!(source = %self.name(), "Previous cycle still running, skipping tick");
            return None;
        };
        Some(
            self.pipeline
                .run_cycle(&self.target, self.source.as_ref())
                .await,
        )
    }
}

/// Registry for managing source worker jobs.
///
/// Uses `tokio-cron-scheduler` for job scheduling.
/// Supports both fixed-interval and cron-based scheduling.
pub struct CollectorRegistry {
    scheduler: JobScheduler,
    jobs: Arc<RwLock<HashMap<uuid::Uuid, JobInfo>>>,
}

impl CollectorRegistry {
    /// Create a new registry.
    pub async fn new() -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    /// Register and schedule a worker.
    pub async fn spawn(&self, worker: SourceWorker) -> Result<uuid::Uuid, SchedulerError> {
        let name = worker.name().to_owned();
        let schedule_desc = worker.schedule().to_string();

        let job = Self::create_job(Arc::new(worker)).inspect_err(|e| {
            tracing::error!(source = %name, schedule = %schedule_desc, error = %e, "Job creation failed");
        })?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))
            .inspect_err(|e| {
                tracing::error!(source = %name, error = %e, "Job registration failed");
            })?;

        self.jobs.write().await.insert(
            job_id,
            JobInfo {
                id: job_id,
                name: name.clone(),
                schedule: schedule_desc.clone(),
            },
        );

        tracing::info!(source = %name, job_id = %job_id, schedule = %schedule_desc, "Source worker registered");
        Ok(job_id)
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;
        tracing::info!("Collector scheduler started");
        Ok(())
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        let job_count = self.jobs.read().await.len();
        let result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Scheduler(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::info!(job_count, "Collector scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(job_count, error = %e, "Collector scheduler shutdown failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(job_count, "Collector scheduler shutdown timed out");
                Ok(())
            }
        }
    }

    /// Remove a specific job by ID.
    pub async fn remove(&self, job_id: &uuid::Uuid) -> Result<(), SchedulerError> {
        self.scheduler
            .remove(job_id)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let removed = self.jobs.write().await.remove(job_id);
        tracing::info!(job_id = %job_id, source = ?removed.map(|j| j.name), "Source worker removed");
        Ok(())
    }

    // --- Private helpers ---

    fn create_job(worker: Arc<SourceWorker>) -> Result<Job, SchedulerError> {
        let schedule = worker.schedule().clone();

        let make_callback = move || {
            let worker = Arc::clone(&worker);
            move |_: uuid::Uuid, _: JobScheduler| {
                let worker = Arc::clone(&worker);
                Box::pin(async move { run_worker(&worker).await })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }
        };

        match &schedule {
            Schedule::Interval(d) => Job::new_repeated_async(*d, make_callback()),
            Schedule::Cron(expr) => Job::new_cron_job_async(expr, make_callback()),
        }
        .map_err(|e| SchedulerError::Scheduler(e.to_string()))
    }
}

/// Execute one scheduled cycle and log the outcome.
async fn run_worker(worker: &SourceWorker) {
    tracing::debug!(source = %worker.name(), "Running cycle");

    let Some(report) = worker.run_once().await else {
        return;
    };
    let duration_ms = report.duration.as_millis();

    if report.is_success() {
        tracing::debug!(
            source = %report.source,
            tables = report.inserted.len(),
            duration_ms,
            "Cycle succeeded"
        );
    } else {
        for (table, error) in &report.failed {
            tracing::error!(source = %report.source, table = %table, error = %error, "Cycle failed");
        }
    }
}
