//! Scheduler service wrapper around tokio-cron-scheduler.
//!
//! Jobs registered through [`SchedulerService::register_job`] get an overlap
//! guard, optional jitter, and run history in the [`JobRegistry`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{JobOutput, JobRegistry, JobResult};
use crate::{with_jitter, JitterConfig, OverlapGuard, SchedulerConfig, SchedulerError};

/// Validate a 6-field cron expression (sec min hour day month weekday).
///
/// ```
/// use indexer_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("*/30 * * * * *").is_ok());
/// assert!(validate_cron_expression("not cron").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Lifecycle wrapper around [`JobScheduler`].
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
    registry: Arc<JobRegistry>,
}

impl SchedulerService {
    /// Create a stopped scheduler. The default timezone is validated here.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
            registry: Arc::new(JobRegistry::new()),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");

        Ok(())
    }

    /// Stop scheduling new runs and wait for running jobs.
    ///
    /// Cancels the shutdown token, then waits until no registered job is
    /// running or `shutdown_timeout_secs` has passed.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.registry.any_running() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_secs = self.config.shutdown_timeout_secs,
                    "Jobs still running at shutdown timeout"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Error during scheduler shutdown: {}", e);
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");

        Ok(())
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Add a raw job. It is not tracked in the registry.
    pub async fn add_job(&self, job: Job) -> Result<uuid::Uuid, SchedulerError> {
        let uuid = self.scheduler.add(job).await?;
        Ok(uuid)
    }

    fn resolve_timezone(&self, timezone: Option<&str>) -> Result<Tz, SchedulerError> {
        match timezone {
            Some(tz) => Self::parse_timezone(tz),
            None => self.config.parse_timezone(),
        }
    }

    /// Add an untracked cron job that receives the shutdown token.
    pub async fn add_cron_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tz = self.resolve_timezone(timezone)?;
        validate_cron_expression(cron_expr)?;

        let job_name = name.to_string();
        let shutdown_token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let name = job_name.clone();
            let token = shutdown_token.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                let start = Instant::now();
                job_fn(token).await;
                debug!(job = %name, duration_ms = start.elapsed().as_millis() as u64, "Job completed");
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(job = %name, uuid = %uuid, cron = %cron_expr, timezone = %tz.name(), "Job registered");

        Ok(uuid)
    }

    /// Register a tracked job.
    ///
    /// Each tick is skipped once shutdown has begun or while the previous run
    /// is still active. Otherwise the job waits out its jitter, runs, and its
    /// result is recorded.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        jitter: JitterConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutput, String>> + Send + 'static,
    {
        let tz = self.resolve_timezone(timezone)?;
        validate_cron_expression(cron_expr)?;

        if !self.registry.register(name, cron_expr) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let job_name = name.to_string();
        let registry = Arc::clone(&self.registry);
        let guard = Arc::new(OverlapGuard::new());
        let shutdown_token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let name = job_name.clone();
            let registry = Arc::clone(&registry);
            let guard = Arc::clone(&guard);
            let token = shutdown_token.clone();
            let jitter = jitter.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if token.is_cancelled() {
                    registry.record_skip(&name, "shutting down");
                    return;
                }
                let Some(_run) = guard.try_acquire() else {
                    debug!(job = %name, "Previous run still active, skipping");
                    registry.record_skip(&name, "previous run still active");
                    return;
                };

                registry.record_start(&name);
                let start = Instant::now();
                let outcome = with_jitter(&jitter, job_fn()).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match outcome {
                    Ok(output) => {
                        debug!(job = %name, duration_ms, "Job completed");
                        registry.record_complete(&name, JobResult::Success, duration_ms, output);
                    }
                    Err(e) => {
                        warn!(job = %name, duration_ms, error = %e, "Job failed");
                        registry.record_complete(&name, JobResult::Failed(e), duration_ms, JobOutput::new());
                    }
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(
            job = %name,
            uuid = %uuid,
            cron = %cron_expr,
            timezone = %tz.name(),
            "Job registered"
        );

        Ok(uuid)
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }
}
