//! RPC traits for the staker daemon.

use bitcoin::{Txid, XOnlyPublicKey};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

use crate::types::{
    RpcSpendResult, RpcStakeOutput, RpcStakeResult, RpcStoredTransactionsResponse, RpcUnbondResult,
    RpcUtxo, RpcValidatorsResponse,
};

/// RPCs that drive the staking lifecycle.
#[cfg_attr(not(feature = "client"), rpc(server, namespace = "staker"))]
#[cfg_attr(feature = "client", rpc(server, client, namespace = "staker"))]
pub trait StakerControlApi {
    /// Builds, broadcasts and tracks a staking transaction.
    #[method(name = "stake")]
    async fn stake(
        &self,
        staker_address: String,
        staking_amount_sat: u64,
        validator_pks: Vec<XOnlyPublicKey>,
        staking_time_blocks: u16,
    ) -> RpcResult<RpcStakeResult>;

    /// Starts early unbonding of a delegation.
    #[method(name = "unbond")]
    async fn unbond(
        &self,
        staking_txid: Txid,
        fee_rate_sat_per_kvb: Option<u64>,
    ) -> RpcResult<RpcUnbondResult>;

    /// Spends an expired or unbonded stake back to the staker.
    #[method(name = "unstake")]
    async fn unstake(&self, staking_txid: Txid) -> RpcResult<RpcSpendResult>;

    /// Computes the staking output for externally built transactions.
    #[method(name = "stakeOutput")]
    async fn stake_output(
        &self,
        staker_pk: XOnlyPublicKey,
        staking_amount_sat: u64,
        validator_pks: Vec<XOnlyPublicKey>,
        staking_time_blocks: u16,
    ) -> RpcResult<RpcStakeOutput>;
}

/// Read-only RPCs.
#[cfg_attr(not(feature = "client"), rpc(server, namespace = "staker"))]
#[cfg_attr(feature = "client", rpc(server, client, namespace = "staker"))]
pub trait StakerQueryApi {
    /// Pages through all tracked transactions.
    #[method(name = "storedTransactions")]
    async fn stored_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcStoredTransactionsResponse>;

    /// Pages through transactions whose stake is currently spendable.
    #[method(name = "withdrawableTransactions")]
    async fn withdrawable_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcStoredTransactionsResponse>;

    /// Lists unspent wallet outputs.
    #[method(name = "listUnspent")]
    async fn list_unspent(&self) -> RpcResult<Vec<RpcUtxo>>;

    /// Lists validators registered on the coordinator.
    #[method(name = "activeValidators")]
    async fn list_active_validators(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcValidatorsResponse>;
}
