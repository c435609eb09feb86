//! Configuration for the persistence layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of retries for a busy database.
pub const DEFAULT_MAX_RETRY_COUNT: usize = 3;

/// Default backoff between retries.
pub const DEFAULT_BACKOFF_PERIOD: Duration = Duration::from_millis(200);

/// The configuration for the SQLite store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    max_retry_count: usize,
    backoff_period: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            backoff_period: DEFAULT_BACKOFF_PERIOD,
        }
    }
}

impl DbConfig {
    /// Sets the max retry count.
    pub fn with_max_retry_count(self, count: usize) -> Self {
        Self {
            max_retry_count: count,
            ..self
        }
    }

    /// Sets the backoff period.
    pub fn with_backoff_period(self, period: Duration) -> Self {
        Self {
            backoff_period: period,
            ..self
        }
    }

    /// Returns the max retry count.
    pub fn max_retry_count(&self) -> usize {
        self.max_retry_count
    }

    /// Returns the backoff period.
    pub fn backoff_period(&self) -> Duration {
        self.backoff_period
    }
}
