//! Error type for the transaction builder.

use bitcoin::{Amount, Txid};
use staker_primitives::script::ScriptDataError;
use thiserror::Error;

/// Errors produced while constructing staking transactions and scripts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    /// The staking amount does not strictly exceed the effective slashing fee.
    #[error("staking amount {amount} must exceed the slashing fee {fee}")]
    StakingAmountTooLow {
        /// Requested staking amount.
        amount: Amount,
        /// Effective slashing fee.
        fee: Amount,
    },

    /// The requested staking time is below the coordinator-derived minimum.
    #[error("staking time {got} blocks is below the minimum of {min} blocks")]
    StakingTimeTooShort {
        /// Requested staking time in blocks.
        got: u32,
        /// Minimum staking time in blocks.
        min: u32,
    },

    /// The fee rate is below the relay floor.
    #[error("fee rate {got} is below the minimum of {min} per kvB")]
    FeeRateTooLow {
        /// Requested fee rate per kvB.
        got: Amount,
        /// Minimum fee rate per kvB.
        min: Amount,
    },

    /// An output would be created at or below the dust limit.
    #[error("output value {0} is at or below the dust limit")]
    DustOutput(Amount),

    /// The referenced staking output does not exist.
    #[error("staking output index {index} out of bounds ({outputs} outputs)")]
    InvalidOutputIndex {
        /// Referenced output index.
        index: u32,
        /// Number of outputs in the transaction.
        outputs: usize,
    },

    /// The signing key does not correspond to the staker key in the script.
    #[error("signing key does not match the staker key committed in the script")]
    StakerKeyMismatch,

    /// The transaction is not part of the supplied block.
    #[error("transaction {0} not found in block")]
    TxNotInBlock(Txid),

    /// Invalid script commitment data.
    #[error(transparent)]
    ScriptData(#[from] ScriptDataError),

    /// The taproot tree could not be assembled from the leaf scripts.
    #[error("failed to assemble taproot tree for the staking output")]
    TaprootAssembly,

    /// Sighash computation failed.
    #[error("sighash computation failed: {0}")]
    Sighash(String),
}
