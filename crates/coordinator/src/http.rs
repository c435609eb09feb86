//! JSON-RPC implementation of [`CoordinatorClient`].
//!
//! Chain queries and submissions go to a coordinator node over HTTP;
//! coordinator-chain signing stays local in the [`Keyring`].

use async_trait::async_trait;
use bitcoin::{secp256k1::PublicKey, Txid, XOnlyPublicKey};
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use staker_primitives::{DelegationData, UndelegationData};
use tracing::debug;

use crate::{
    client::CoordinatorClient,
    error::{CoordinatorError, CoordinatorResult},
    keyring::Keyring,
    types::{CoordinatorParams, DelegationDetails, UnbondingSignatures, ValidatorsResponse},
};

/// A [`CoordinatorClient`] over JSON-RPC.
#[derive(Debug)]
pub struct HttpCoordinator {
    http: HttpClient,
    keyring: Keyring,
}

impl HttpCoordinator {
    /// Connects to a coordinator node.
    pub fn connect(url: &str, keyring: Keyring) -> CoordinatorResult<Self> {
        let http = HttpClientBuilder::default()
            .build(url)
            .map_err(|e| CoordinatorError::Rpc(e.to_string()))?;
        Ok(Self { http, keyring })
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinator {
    async fn params(&self) -> CoordinatorResult<CoordinatorParams> {
        Ok(self.http.request("coordinator_params", rpc_params![]).await?)
    }

    async fn sign(&self, payload: &[u8]) -> CoordinatorResult<Vec<u8>> {
        Ok(self.keyring.sign(payload))
    }

    fn pub_key(&self) -> PublicKey {
        self.keyring.public_key()
    }

    async fn validator_exists(&self, validator_key: &XOnlyPublicKey) -> CoordinatorResult<bool> {
        Ok(self
            .http
            .request("coordinator_validatorExists", rpc_params![validator_key])
            .await?)
    }

    async fn is_tx_already_part_of_delegation(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<bool> {
        Ok(self
            .http
            .request("coordinator_hasDelegation", rpc_params![staking_txid])
            .await?)
    }

    async fn submit_delegation(&self, delegation: DelegationData) -> CoordinatorResult<()> {
        let txid = delegation.staking_tx.compute_txid();
        debug!(staking_txid = %txid, "submitting delegation to coordinator");

        self.http
            .request::<(), _>("coordinator_submitDelegation", rpc_params![delegation])
            .await
            .map_err(|e| CoordinatorError::Rejected(e.to_string()))
    }

    async fn query_delegation_info(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<DelegationDetails> {
        let details: Option<DelegationDetails> = self
            .http
            .request("coordinator_delegation", rpc_params![staking_txid])
            .await?;

        details.ok_or(CoordinatorError::DelegationNotFound(*staking_txid))
    }

    async fn submit_undelegation(
        &self,
        staking_txid: &Txid,
        undelegation: UndelegationData,
    ) -> CoordinatorResult<()> {
        debug!(%staking_txid, "submitting undelegation to coordinator");

        self.http
            .request::<(), _>(
                "coordinator_submitUndelegation",
                rpc_params![staking_txid, undelegation],
            )
            .await
            .map_err(|e| CoordinatorError::Rejected(e.to_string()))
    }

    async fn query_unbonding_signatures(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<UnbondingSignatures> {
        Ok(self
            .http
            .request("coordinator_unbondingSignatures", rpc_params![staking_txid])
            .await?)
    }

    async fn query_validators(
        &self,
        limit: u64,
        offset: u64,
    ) -> CoordinatorResult<ValidatorsResponse> {
        Ok(self
            .http
            .request("coordinator_validators", rpc_params![limit, offset])
            .await?)
    }
}
