//! Run-control tuning knobs.

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunControlConfig {
    /// Length of the sliding rate-limit window, in seconds.
    pub rate_limit_window_secs: u64,
    /// Runs allowed to start within one window.
    pub rate_limit_max_runs: usize,
    /// Consecutive failed runs that disable a workflow.
    pub max_consecutive_errors: usize,
    /// How long an armed test run waits for its event.
    pub test_run_minutes: i64,
}

impl Default for RunControlConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: 60,
            rate_limit_max_runs: 10,
            max_consecutive_errors: 5,
            test_run_minutes: 10,
        }
    }
}

impl RunControlConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.rate_limit_window_secs).unwrap_or(i64::MAX))
    }

    pub fn test_run_duration(&self) -> Duration {
        Duration::minutes(self.test_run_minutes)
    }
}
