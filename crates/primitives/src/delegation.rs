//! Payloads submitted to the coordinator chain.

use bitcoin::{secp256k1::schnorr, secp256k1::PublicKey, BlockHash, Transaction};
use serde::{Deserialize, Serialize};

use crate::{pop::ProofOfPossession, script::StakingScriptData};

/// Merkle path proving that a transaction is included in a Bitcoin block.
///
/// The proof bytes are a consensus-serialized partial merkle tree matching
/// exactly one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// The block the transaction was included in.
    pub block_hash: BlockHash,

    /// Position of the transaction within the block.
    pub tx_index: u32,

    /// Consensus-serialized partial merkle tree.
    pub proof: Vec<u8>,
}

/// Everything the coordinator needs to register a delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationData {
    /// The confirmed Bitcoin staking transaction.
    pub staking_tx: Transaction,

    /// Index of the staked output within `staking_tx`.
    pub staking_output_index: u32,

    /// Proof of inclusion of `staking_tx` in the Bitcoin chain.
    pub inclusion_proof: InclusionProof,

    /// The script commitment of the staked output.
    pub script_data: StakingScriptData,

    /// Pre-signed slashing transaction spending the staked output.
    pub slashing_tx: Transaction,

    /// Staker Schnorr signature on `slashing_tx` over the slashing path.
    pub staker_slashing_sig: schnorr::Signature,

    /// The staker's coordinator-chain public key.
    pub staker_coordinator_pk: PublicKey,

    /// Proof that the staker controls both keys.
    pub pop: ProofOfPossession,
}

/// Everything the coordinator needs to register an undelegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndelegationData {
    /// The unbonding transaction spending the staked output.
    pub unbonding_tx: Transaction,

    /// The script commitment of the unbonding output.
    pub script_data: StakingScriptData,

    /// Staker Schnorr signature on `unbonding_tx` over the unbonding path.
    pub staker_unbonding_sig: schnorr::Signature,
}
