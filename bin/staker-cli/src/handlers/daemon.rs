//! Handlers that talk to a running staker daemon.

use std::str::FromStr;

use anyhow::Context;
use bitcoin::{Txid, XOnlyPublicKey};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use staker_rpc::traits::{StakerControlApiClient, StakerQueryApiClient};

fn connect(daemon_address: &str) -> anyhow::Result<HttpClient> {
    HttpClientBuilder::default()
        .build(daemon_address)
        .with_context(|| format!("connect to daemon at {daemon_address}"))
}

fn parse_validator_pk(validator_pk: &str) -> anyhow::Result<XOnlyPublicKey> {
    XOnlyPublicKey::from_str(validator_pk).context("invalid validator key")
}

fn parse_txid(staking_txid: &str) -> anyhow::Result<Txid> {
    Txid::from_str(staking_txid).context("invalid staking txid")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn stake(
    daemon_address: &str,
    staker_address: String,
    staking_amount: u64,
    validator_pk: &str,
    staking_time: u16,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client
        .stake(
            staker_address,
            staking_amount,
            vec![parse_validator_pk(validator_pk)?],
            staking_time,
        )
        .await?;
    print_json(&result)
}

pub(crate) async fn unbond(
    daemon_address: &str,
    staking_txid: &str,
    fee_rate: Option<u64>,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.unbond(parse_txid(staking_txid)?, fee_rate).await?;
    print_json(&result)
}

pub(crate) async fn unstake(daemon_address: &str, staking_txid: &str) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.unstake(parse_txid(staking_txid)?).await?;
    print_json(&result)
}

pub(crate) async fn stake_output(
    daemon_address: &str,
    staker_pk: &str,
    staking_amount: u64,
    validator_pk: &str,
    staking_time: u16,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client
        .stake_output(
            XOnlyPublicKey::from_str(staker_pk).context("invalid staker key")?,
            staking_amount,
            vec![parse_validator_pk(validator_pk)?],
            staking_time,
        )
        .await?;
    print_json(&result)
}

pub(crate) async fn stored_transactions(
    daemon_address: &str,
    limit: u64,
    offset: u64,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.stored_transactions(limit, offset).await?;
    print_json(&result)
}

pub(crate) async fn withdrawable_transactions(
    daemon_address: &str,
    limit: u64,
    offset: u64,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.withdrawable_transactions(limit, offset).await?;
    print_json(&result)
}

pub(crate) async fn list_unspent(daemon_address: &str) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.list_unspent().await?;
    print_json(&result)
}

pub(crate) async fn list_validators(
    daemon_address: &str,
    limit: u64,
    offset: u64,
) -> anyhow::Result<()> {
    let client = connect(daemon_address)?;
    let result = client.list_active_validators(limit, offset).await?;
    print_json(&result)
}
