//! Error types for chain notifications.

use thiserror::Error;

/// Errors produced while establishing or serving notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The Bitcoin RPC backend failed.
    #[error("bitcoin rpc: {0}")]
    Client(#[from] bitcoind_async_client::error::ClientError),

    /// The notifier is shutting down.
    #[error("notifier is shutting down")]
    ShuttingDown,
}

/// Wrapper type for notifier results.
pub type NotifyResult<T> = Result<T, NotifyError>;
