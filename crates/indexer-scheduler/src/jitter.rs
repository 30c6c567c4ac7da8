//! Random start delay for scheduled runs.
//!
//! Several processes ticking on the same cron expression would otherwise hit
//! the store and the search backend at the same instant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound for the random delay applied before a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum delay in seconds (0 = none)
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// A delay in `[0, max_jitter_secs)`, millisecond resolution.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Sleep for a random jitter, then run `job`.
pub async fn with_jitter<F, T>(config: &JitterConfig, job: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let delay = config.generate_jitter();
    if !delay.is_zero() {
        tracing::debug!(jitter_ms = delay.as_millis() as u64, "Applying jitter delay");
        tokio::time::sleep(delay).await;
    }
    job.await
}
