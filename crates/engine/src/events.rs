//! Requests and events flowing through the engine's channels.

use bitcoin::{secp256k1::schnorr, Address, Block, BlockHash, ScriptBuf, Transaction, Txid};
use staker_db::WatchedData;
use staker_primitives::{ProofOfPossession, StakingScriptData, UndelegationData};
use tokio::sync::oneshot;

use crate::errors::EngineError;

/// One-shot reply slot carried by every user request.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// A new staking transaction to track (owned or watched).
pub(crate) struct StakingRequest {
    pub staking_tx: Transaction,
    pub staking_output_index: u32,
    pub staking_output_script: ScriptBuf,
    pub script_data: StakingScriptData,
    /// Confirmations required before submitting to the coordinator.
    pub required_depth: u32,
    pub pop: ProofOfPossession,
    pub staker_address: Address,
    /// Present for watched transactions; owned ones are broadcast by us.
    pub watched: Option<WatchedData>,
    pub reply: Reply<Txid>,
}

impl StakingRequest {
    pub(crate) fn is_watched(&self) -> bool {
        self.watched.is_some()
    }
}

/// An undelegation, validated and built, ready for the coordinator.
pub(crate) struct UnbondingRequest {
    pub staking_txid: Txid,
    pub undelegation: UndelegationData,
    pub reply: Reply<Txid>,
}

/// The staking transaction reached its confirmation depth on Bitcoin.
pub(crate) struct StakingTxConfirmation {
    pub staking_txid: Txid,
    pub tx_index: u32,
    pub block_hash: BlockHash,
    pub block_height: u32,
    /// The including block, used to build the inclusion proof.
    pub inclusion_block: Option<Block>,
}

/// Ask the coordinator-sender task to submit a delegation.
pub(crate) struct DelegationSendRequest {
    pub staking_txid: Txid,
    pub tx_index: u32,
    pub inclusion_block: Block,
}

/// Outcome of a delegation submission.
pub(crate) struct DelegationSendResult {
    pub staking_txid: Txid,
    pub result: Result<(), EngineError>,
}

/// The coordinator accepted an undelegation (or already had one). Carries the
/// reply slot when a live user request is waiting; reconciler-synthesized
/// acks have none.
pub(crate) struct UnbondingStartedAck {
    pub staking_txid: Txid,
    pub unbonding_tx: Transaction,
    pub script_data: StakingScriptData,
    pub reply: Option<Reply<Txid>>,
}

/// Jury and validator signatures arrived on the coordinator.
pub(crate) struct UnbondingSignaturesEvent {
    pub staking_txid: Txid,
    pub validator_sig: schnorr::Signature,
    pub jury_sig: schnorr::Signature,
}

/// The unbonding transaction is confirmed on Bitcoin.
pub(crate) struct UnbondingTxConfirmation {
    pub staking_txid: Txid,
    pub block_hash: BlockHash,
    pub block_height: u32,
}

/// A transaction spending the stake is confirmed on Bitcoin.
pub(crate) struct SpendConfirmation {
    pub staking_txid: Txid,
}
