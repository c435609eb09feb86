//! Daemon-level constants.

/// File name of the SQLite database inside the data directory.
pub(crate) const DB_FILE_NAME: &str = "stakerd.sqlite";

/// Default polling cadence against the Bitcoin node, in seconds.
pub(crate) const DEFAULT_BTC_POLL_INTERVAL_SECS: u64 = 5;
