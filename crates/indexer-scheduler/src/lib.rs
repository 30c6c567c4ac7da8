//! Background drain scheduling for the reference indexer.
//!
//! Wraps `tokio-cron-scheduler` with timezone support, graceful shutdown,
//! an overlap guard and jitter, and registers one drain job per shard.
//!
//! A shard must never be drained twice at the same time. Each shard gets its
//! own job guarded by an [`OverlapGuard`], so a tick that fires while the
//! previous drain of that shard is still running is skipped. This holds
//! within one process only; running several schedulers against the same
//! store needs an external lock.
//!
//! # Example
//!
//! ```ignore
//! use indexer_scheduler::{create_drain_jobs, DrainJobConfig, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! let jobs = create_drain_jobs(&scheduler, queues, registry, backend, DrainJobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod jitter;
mod overlap;
mod registry;
mod scheduler;

pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::{with_jitter, JitterConfig};
pub use jobs::drain::{create_drain_jobs, drain_job_name, run_drain, DrainJobConfig};
pub use overlap::{OverlapGuard, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
