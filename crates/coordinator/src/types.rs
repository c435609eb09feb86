//! Coordinator-chain data types.

use bitcoin::{secp256k1::schnorr, Amount, Transaction, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use staker_primitives::StakingScriptData;

/// Staking parameters published by the coordinator chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorParams {
    /// The jury key required on unbonding and slashing paths.
    pub jury_key: XOnlyPublicKey,

    /// Network-qualified address slashed funds are paid to.
    pub slashing_address: String,

    /// Minimum fee the coordinator accepts on slashing transactions.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_slashing_fee: Amount,

    /// Bitcoin confirmations required before a delegation is accepted.
    pub confirmation_depth: u16,

    /// Coordinator finalization timeout in Bitcoin blocks; also the timelock
    /// of unbonding outputs.
    pub finalization_timeout: u16,
}

/// Undelegation data the coordinator holds for a delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndelegationInfo {
    /// The registered unbonding transaction.
    pub unbonding_tx: Transaction,

    /// Script commitment of the unbonding output.
    pub script_data: StakingScriptData,
}

/// Delegation state as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationDetails {
    /// Present once an undelegation has been registered.
    pub undelegation: Option<UndelegationInfo>,
}

/// Unbonding co-signatures collected on the coordinator chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingSignatures {
    /// The validator's signature, once submitted.
    pub validator_sig: Option<schnorr::Signature>,

    /// The jury's signature, once submitted.
    pub jury_sig: Option<schnorr::Signature>,
}

impl UnbondingSignatures {
    /// Whether both co-signatures are available.
    pub fn is_complete(&self) -> bool {
        self.validator_sig.is_some() && self.jury_sig.is_some()
    }
}

/// A validator registered on the coordinator chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// The validator's Bitcoin key.
    pub btc_pk: XOnlyPublicKey,

    /// Human-readable moniker.
    pub moniker: String,
}

/// One page of registered validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorsResponse {
    /// Validators in this page.
    pub validators: Vec<ValidatorInfo>,

    /// Total number of registered validators.
    pub total: u64,
}
