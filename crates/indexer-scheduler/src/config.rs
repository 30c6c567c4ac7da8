//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use indexer_types::SchedulerSettings;

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default IANA timezone for jobs that do not name one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// How long shutdown waits for running jobs to finish.
    ///
    /// Drains are never interrupted; a drain still running after this
    /// leaves its shard untouched or fully processed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            default_timezone: settings.timezone.clone(),
            ..Default::default()
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}
