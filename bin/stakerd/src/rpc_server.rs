//! Bootstraps the JSON-RPC server for the daemon.

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use bitcoin::{Address, Amount, Network, Txid, XOnlyPublicKey};
use jsonrpsee::{
    core::RpcResult, server::ServerHandle, types::ErrorObjectOwned, RpcModule,
};
use staker_db::TrackedTransaction;
use staker_engine::{EngineError, StakerApp};
use staker_rpc::{
    traits::{StakerControlApiServer, StakerQueryApiServer},
    types::{
        RpcSpendResult, RpcStakeOutput, RpcStakeResult, RpcStoredTransaction,
        RpcStoredTransactionsResponse, RpcUnbondResult, RpcUtxo, RpcValidator,
        RpcValidatorsResponse,
    },
};
use tracing::info;

/// Starts the RPC server for the staker daemon.
pub(crate) async fn start(
    app: Arc<StakerApp>,
    network: Network,
    rpc_addr: &str,
) -> anyhow::Result<ServerHandle> {
    let rpc = StakerRpc { app, network };

    let mut rpc_module = RpcModule::new(());
    rpc_module.merge(StakerControlApiServer::into_rpc(rpc.clone()))?;
    rpc_module.merge(StakerQueryApiServer::into_rpc(rpc))?;

    info!(%rpc_addr, "starting staker RPC server");
    let server = jsonrpsee::server::Server::builder().build(rpc_addr).await?;
    let handle = server.start(rpc_module);
    info!(%rpc_addr, "staker RPC server started");

    Ok(handle)
}

/// RPC server state: a handle to the engine and the active network.
#[derive(Clone)]
struct StakerRpc {
    app: Arc<StakerApp>,
    network: Network,
}

impl StakerRpc {
    fn parse_address(&self, address: &str) -> Result<Address, ErrorObjectOwned> {
        Address::from_str(address)
            .ok()
            .and_then(|a| a.require_network(self.network).ok())
            .ok_or_else(|| {
                invalid_params(format!(
                    "address {address} is not valid for network {}",
                    self.network
                ))
            })
    }
}

fn invalid_params(msg: String) -> ErrorObjectOwned {
    ErrorObjectOwned::owned::<()>(-32602, msg, None)
}

fn to_rpc_error(err: EngineError) -> ErrorObjectOwned {
    match &err {
        EngineError::InvalidArgument(_) | EngineError::Builder(_) => {
            invalid_params(err.to_string())
        }
        EngineError::ShuttingDown => {
            ErrorObjectOwned::owned::<()>(-32000, err.to_string(), None)
        }
        _ => ErrorObjectOwned::owned::<()>(-32603, err.to_string(), None),
    }
}

fn single_validator(validator_pks: &[XOnlyPublicKey]) -> Result<XOnlyPublicKey, ErrorObjectOwned> {
    match validator_pks {
        [pk] => Ok(*pk),
        _ => Err(invalid_params(
            "exactly one validator key must be provided".to_string(),
        )),
    }
}

fn to_rpc_stored_transaction(record: &TrackedTransaction) -> RpcStoredTransaction {
    RpcStoredTransaction {
        staking_txid: record.staking_txid(),
        staker_address: record.staker_address.clone(),
        amount_sat: record.staking_output().value.to_sat(),
        state: record.state.to_string(),
        watched: record.is_watched(),
        confirmed_height: record.btc_inclusion.map(|inc| inc.block_height),
        unbonding_txid: record
            .unbonding
            .as_ref()
            .map(|u| u.unbonding_tx.compute_txid()),
    }
}

#[async_trait]
impl StakerControlApiServer for StakerRpc {
    async fn stake(
        &self,
        staker_address: String,
        staking_amount_sat: u64,
        validator_pks: Vec<XOnlyPublicKey>,
        staking_time_blocks: u16,
    ) -> RpcResult<RpcStakeResult> {
        let staker_address = self.parse_address(&staker_address)?;
        let validator_pk = single_validator(&validator_pks)?;

        let staking_txid = self
            .app
            .stake_funds(
                staker_address,
                Amount::from_sat(staking_amount_sat),
                validator_pk,
                staking_time_blocks,
            )
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcStakeResult { staking_txid })
    }

    async fn unbond(
        &self,
        staking_txid: Txid,
        fee_rate_sat_per_kvb: Option<u64>,
    ) -> RpcResult<RpcUnbondResult> {
        let unbonding_txid = self
            .app
            .unbond_staking(staking_txid, fee_rate_sat_per_kvb.map(Amount::from_sat))
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcUnbondResult { unbonding_txid })
    }

    async fn unstake(&self, staking_txid: Txid) -> RpcResult<RpcSpendResult> {
        let (spend_txid, value) = self
            .app
            .spend_stake(staking_txid)
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcSpendResult {
            spend_txid,
            value_sat: value.to_sat(),
        })
    }

    async fn stake_output(
        &self,
        staker_pk: XOnlyPublicKey,
        staking_amount_sat: u64,
        validator_pks: Vec<XOnlyPublicKey>,
        staking_time_blocks: u16,
    ) -> RpcResult<RpcStakeOutput> {
        let validator_pk = single_validator(&validator_pks)?;

        let output = self
            .app
            .stake_output(
                staker_pk,
                validator_pk,
                Amount::from_sat(staking_amount_sat),
                staking_time_blocks,
            )
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcStakeOutput {
            output_script_hex: output.script_pubkey.to_hex_string(),
            amount_sat: output.value.to_sat(),
        })
    }
}

#[async_trait]
impl StakerQueryApiServer for StakerRpc {
    async fn stored_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcStoredTransactionsResponse> {
        let page = self
            .app
            .stored_transactions(limit, offset)
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcStoredTransactionsResponse {
            transactions: page.transactions.iter().map(to_rpc_stored_transaction).collect(),
            total: page.total,
        })
    }

    async fn withdrawable_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcStoredTransactionsResponse> {
        let page = self
            .app
            .withdrawable_transactions(limit, offset)
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcStoredTransactionsResponse {
            transactions: page.transactions.iter().map(to_rpc_stored_transaction).collect(),
            total: page.total,
        })
    }

    async fn list_unspent(&self) -> RpcResult<Vec<RpcUtxo>> {
        let utxos = self
            .app
            .list_unspent_outputs()
            .await
            .map_err(to_rpc_error)?;

        Ok(utxos
            .into_iter()
            .map(|utxo| RpcUtxo {
                txid: utxo.outpoint.txid,
                vout: utxo.outpoint.vout,
                amount_sat: utxo.amount.to_sat(),
                confirmations: utxo.confirmations,
            })
            .collect())
    }

    async fn list_active_validators(
        &self,
        limit: u64,
        offset: u64,
    ) -> RpcResult<RpcValidatorsResponse> {
        let validators = self
            .app
            .list_active_validators(limit, offset)
            .await
            .map_err(to_rpc_error)?;

        Ok(RpcValidatorsResponse {
            validators: validators
                .validators
                .into_iter()
                .map(|v| RpcValidator {
                    btc_pk: v.btc_pk,
                    moniker: v.moniker,
                })
                .collect(),
            total: validators.total,
        })
    }
}
