//! Wire types for the staker RPC.

use bitcoin::{Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

/// Result of a `stake` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStakeResult {
    /// Txid of the broadcast staking transaction.
    pub staking_txid: Txid,
}

/// Result of an `unbond` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUnbondResult {
    /// Txid of the registered unbonding transaction.
    pub unbonding_txid: Txid,
}

/// Result of an `unstake` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSpendResult {
    /// Txid of the broadcast spend transaction.
    pub spend_txid: Txid,

    /// Value paid back to the staker, in sats.
    pub value_sat: u64,
}

/// Result of a `stakeOutput` call: the output a staking transaction must
/// carry, without building or broadcasting anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStakeOutput {
    /// Hex-encoded script pubkey of the staking output.
    pub output_script_hex: String,

    /// Value of the staking output, in sats.
    pub amount_sat: u64,
}

/// A tracked transaction as reported over RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStoredTransaction {
    /// The staking txid.
    pub staking_txid: Txid,

    /// Network-qualified staker address.
    pub staker_address: String,

    /// Staked amount in sats.
    pub amount_sat: u64,

    /// Current lifecycle state.
    pub state: String,

    /// Whether the transaction is watched rather than owned.
    pub watched: bool,

    /// Height the staking tx confirmed at, if it has.
    pub confirmed_height: Option<u32>,

    /// Txid of the unbonding transaction, once unbonding started.
    pub unbonding_txid: Option<Txid>,
}

/// A page of tracked transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStoredTransactionsResponse {
    /// Records in this page.
    pub transactions: Vec<RpcStoredTransaction>,

    /// Total number of matching records.
    pub total: u64,
}

/// An unspent wallet output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUtxo {
    /// Txid of the funding transaction.
    pub txid: Txid,

    /// Output index.
    pub vout: u32,

    /// Value in sats.
    pub amount_sat: u64,

    /// Confirmation count.
    pub confirmations: u32,
}

/// A validator listed by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcValidator {
    /// The validator's Bitcoin key.
    pub btc_pk: XOnlyPublicKey,

    /// Human-readable moniker.
    pub moniker: String,
}

/// A page of validators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcValidatorsResponse {
    /// Validators in this page.
    pub validators: Vec<RpcValidator>,

    /// Total number of registered validators.
    pub total: u64,
}
