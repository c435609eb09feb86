//! Unified error type for the lifecycle engine.

use staker_btc_notify::NotifyError;
use staker_coordinator::CoordinatorError;
use staker_db::DbError;
use staker_tx_builder::BuilderError;
use staker_wallet::WalletError;
use thiserror::Error;

/// Everything that can go wrong inside the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A user request failed validation; state is unchanged.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Error from the transaction store.
    #[error("store: {0}")]
    Db(#[from] DbError),

    /// Error from the wallet adapter.
    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    /// Error from the chain notifier.
    #[error("notifier: {0}")]
    Notifier(#[from] NotifyError),

    /// Error from the coordinator client.
    #[error("coordinator: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Error from the transaction builder.
    #[error(transparent)]
    Builder(#[from] BuilderError),

    /// The daemon is shutting down; the request was not processed.
    #[error("daemon is shutting down")]
    ShuttingDown,

    /// An invariant the engine relies on does not hold. The process
    /// terminates rather than continue with inconsistent state.
    #[error("fatal: {0}")]
    Fatal(String),
}
