//! Error types for the transaction store.

use bitcoin::Txid;
use thiserror::Error;

use crate::types::TxState;

/// Errors from the storage driver underneath the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An error from the SQLite driver.
    #[error("sqlite: {0}")]
    Driver(#[from] sqlx::Error),

    /// A record blob failed to encode or decode.
    #[error("codec: {0}")]
    Codec(String),
}

impl From<Box<bincode::ErrorKind>> for StorageError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StorageError::Codec(e.to_string())
    }
}

/// Error type for the transaction store.
#[derive(Debug, Error)]
pub enum DbError {
    /// No record exists under the given staking txid.
    #[error("transaction {0} not found")]
    NotFound(Txid),

    /// A record already exists under the given staking txid.
    #[error("transaction {0} already tracked")]
    DuplicateKey(Txid),

    /// The requested transition is not a legal edge from the current state.
    #[error("invalid state transition for {txid}: {from} -> {to}")]
    InvalidStateTransition {
        /// Staking txid of the record.
        txid: Txid,
        /// State the record is currently in.
        from: TxState,
        /// State the transition would have moved it to.
        to: TxState,
    },

    /// A persisted state tag is not one of the known states. Indicates a
    /// corrupt database or a programming error; callers treat this as fatal.
    #[error("unknown transaction state tag: {0}")]
    UnknownStateTag(u8),

    /// A persisted record carries an unsupported version.
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),

    /// Error from the storage layer.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl DbError {
    /// Whether retrying the operation can possibly succeed. Only driver-level
    /// failures (e.g. a locked database) qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Storage(StorageError::Driver(_)))
    }
}

/// Wrapper type for store results.
pub type DbResult<T> = Result<T, DbError>;
