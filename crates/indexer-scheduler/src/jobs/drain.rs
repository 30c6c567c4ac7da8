//! Per-shard drain jobs.
//!
//! Every shard of every configured queue, plus the retry queue, gets its own
//! job named `drain:<queue>:<shard>`. A tick that fires while the previous run
//! is active is skipped, so a shard is never drained by two runs at once. The dead queue is only
//! inspected, never drained.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use indexer_queue::{BulkProcessQueue, Queues, ReferenceRegistry, SearchBackend, DEAD_QUEUE};
use indexer_types::SchedulerSettings;

use crate::{JitterConfig, JobOutput, SchedulerError, SchedulerService};

/// Schedule shared by all drain jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainJobConfig {
    /// 6-field cron expression (default: every 30 seconds)
    pub cron: String,

    /// Timezone for the cron expression; scheduler default when `None`
    pub timezone: Option<String>,

    /// Max random delay before each drain
    pub jitter_secs: u64,
}

impl Default for DrainJobConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for DrainJobConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            timezone: Some(settings.timezone.clone()),
            jitter_secs: settings.jitter_secs,
        }
    }
}

impl DrainJobConfig {
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = cron.into();
        self
    }

    pub fn with_jitter(mut self, jitter_secs: u64) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }
}

pub fn drain_job_name(queue_name: &str, shard_index: u32) -> String {
    format!("drain:{}:{}", queue_name, shard_index)
}

/// Drain a shard once and report the counts as job metadata.
pub async fn run_drain(drain: &BulkProcessQueue) -> Result<JobOutput, String> {
    let shard = drain.shard();
    let result = drain
        .process()
        .await
        .map_err(|e| format!("drain of {}:{} failed: {}", shard.queue_name, shard.shard_index, e))?;

    if result.processed > 0 {
        info!(
            queue = %shard.queue_name,
            shard = shard.shard_index,
            processed = result.processed,
            failures = result.failures,
            "Drain job processed entries"
        );
    } else {
        debug!(queue = %shard.queue_name, shard = shard.shard_index, "Drain job: shard empty");
    }

    Ok(JobOutput::new()
        .with_metadata("processed", result.processed)
        .with_metadata("failures", result.failures)
        .with_metadata("skipped", result.skipped)
        .with_metadata("dead", result.dead))
}

/// Register one drain job per shard and return the job names.
///
/// Registers all configured queues first, so the retry queue is always
/// covered.
pub async fn create_drain_jobs(
    scheduler: &SchedulerService,
    queues: Arc<Queues>,
    references: Arc<ReferenceRegistry>,
    backend: Arc<dyn SearchBackend>,
    config: DrainJobConfig,
) -> Result<Vec<String>, SchedulerError> {
    queues.register_all_queues()?;

    let mut names = Vec::new();
    for shard in queues.raw_queues() {
        if shard.queue_name == DEAD_QUEUE {
            continue;
        }

        let name = drain_job_name(&shard.queue_name, shard.shard_index);
        let drain = Arc::new(BulkProcessQueue::new(
            Arc::clone(&queues),
            Arc::clone(&references),
            Arc::clone(&backend),
            shard,
        ));

        scheduler
            .register_job(
                &name,
                &config.cron,
                config.timezone.as_deref(),
                JitterConfig::new(config.jitter_secs),
                move || {
                    let drain = Arc::clone(&drain);
                    async move { run_drain(&drain).await }
                },
            )
            .await?;
        names.push(name);
    }

    info!(jobs = names.len(), cron = %config.cron, "Registered drain jobs");
    Ok(names)
}
