//! Error types for the coordinator client.

use bitcoin::Txid;
use thiserror::Error;

/// Errors from the coordinator client.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The coordinator has no delegation for the given staking tx.
    #[error("delegation for {0} not found on the coordinator")]
    DelegationNotFound(Txid),

    /// The queried validator is not registered.
    #[error("validator not found on the coordinator")]
    ValidatorNotFound,

    /// Transport-level failure talking to the coordinator node.
    #[error("coordinator rpc: {0}")]
    Rpc(String),

    /// The coordinator rejected a submission.
    #[error("coordinator rejected submission: {0}")]
    Rejected(String),

    /// The local keyring is missing or unreadable.
    #[error("keyring: {0}")]
    Keyring(String),
}

impl From<jsonrpsee::core::ClientError> for CoordinatorError {
    fn from(e: jsonrpsee::core::ClientError) -> Self {
        CoordinatorError::Rpc(e.to_string())
    }
}

/// Wrapper type for coordinator results.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
