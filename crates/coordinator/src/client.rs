//! The coordinator trait consumed by the lifecycle engine.

use async_trait::async_trait;
use bitcoin::{secp256k1::PublicKey, Txid, XOnlyPublicKey};
use staker_primitives::{DelegationData, UndelegationData};

use crate::{
    error::CoordinatorResult,
    types::{CoordinatorParams, DelegationDetails, UnbondingSignatures, ValidatorsResponse},
};

/// RPC surface of the coordinator chain, plus local signing with the staker's
/// coordinator key.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Fetches the current staking parameters.
    async fn params(&self) -> CoordinatorResult<CoordinatorParams>;

    /// Signs an arbitrary payload with the staker's coordinator key.
    async fn sign(&self, payload: &[u8]) -> CoordinatorResult<Vec<u8>>;

    /// The staker's coordinator-chain public key.
    fn pub_key(&self) -> PublicKey;

    /// Whether a validator is registered on the coordinator.
    async fn validator_exists(&self, validator_key: &XOnlyPublicKey) -> CoordinatorResult<bool>;

    /// Whether the staking tx is already registered as a delegation.
    async fn is_tx_already_part_of_delegation(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<bool>;

    /// Registers a delegation.
    async fn submit_delegation(&self, delegation: DelegationData) -> CoordinatorResult<()>;

    /// Queries delegation state; fails with
    /// [`crate::CoordinatorError::DelegationNotFound`] for unknown txids.
    async fn query_delegation_info(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<DelegationDetails>;

    /// Registers an undelegation.
    async fn submit_undelegation(
        &self,
        staking_txid: &Txid,
        undelegation: UndelegationData,
    ) -> CoordinatorResult<()>;

    /// Polls for unbonding co-signatures.
    async fn query_unbonding_signatures(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<UnbondingSignatures>;

    /// Lists registered validators.
    async fn query_validators(&self, limit: u64, offset: u64)
        -> CoordinatorResult<ValidatorsResponse>;
}
