//! The staker daemon: tracks Bitcoin staking transactions, registers them as
//! delegations on the coordinator chain and drives unbonding and withdrawal.

use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use bitcoin::Amount;
use clap::Parser;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use staker_btc_notify::PollingNotifier;
use staker_coordinator::{HttpCoordinator, Keyring};
use staker_db::persistent::SqliteTracker;
use staker_engine::{StakerApp, StaticFeeEstimator};
use staker_wallet::RpcWallet;
use tokio::{runtime, signal};
use tracing::{debug, error, info, trace};

use crate::{
    args::Cli,
    config::Config,
    constants::{DB_FILE_NAME, DEFAULT_BTC_POLL_INTERVAL_SECS},
    logging::LoggerConfig,
};

mod args;
mod config;
mod constants;
mod logging;
mod rpc_server;

fn main() -> anyhow::Result<()> {
    logging::init(LoggerConfig::new("stakerd".to_string()));

    let cli = Cli::parse();
    let config = parse_toml::<Config>(cli.config)?;

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("must be able to create runtime");

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let network = config.network;
    info!(%network, "starting staker daemon");

    fs::create_dir_all(&config.datadir).context("create data directory")?;

    let db_path = config.datadir.join(DB_FILE_NAME);
    debug!(db_path = %db_path.display(), "opening transaction store");
    let pool = SqlitePoolOptions::new()
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true),
        )
        .await
        .context("open sqlite store")?;
    let tracker = Arc::new(
        SqliteTracker::new(pool, config.db.clone())
            .await
            .context("initialize transaction store")?,
    );

    let wallet = Arc::new(
        RpcWallet::connect(
            &config.wallet.url,
            config.wallet.user.clone(),
            config.wallet.pass.clone(),
            network,
            config.wallet.passphrase.clone(),
        )
        .context("connect wallet")?,
    );

    let btc_client = Arc::new(
        bitcoind_async_client::Client::new(
            config.btc_node.url.clone(),
            config.btc_node.user.clone(),
            config.btc_node.pass.clone(),
            config.btc_node.retry_count,
            config.btc_node.retry_interval,
        )
        .context("connect bitcoin node")?,
    );
    let poll_interval = Duration::from_secs(
        config
            .btc_node
            .poll_interval_secs
            .unwrap_or(DEFAULT_BTC_POLL_INTERVAL_SECS),
    );
    let notifier = Arc::new(PollingNotifier::new(btc_client, poll_interval));

    let keyring =
        Keyring::load(&config.coordinator.keyring_path).context("load coordinator keyring")?;
    let coordinator = Arc::new(
        HttpCoordinator::connect(&config.coordinator.rpc_addr, keyring)
            .context("connect coordinator")?,
    );

    let fee_estimator = Arc::new(StaticFeeEstimator::new(Amount::from_sat(
        config.fee.static_fee_rate_sat_per_kvb,
    )));

    let app = Arc::new(StakerApp::new(
        network,
        wallet,
        coordinator,
        notifier.clone(),
        fee_estimator,
        tracker,
    ));

    app.start().await.context("start staker app")?;

    let rpc_handle = rpc_server::start(app.clone(), network, &config.rpc_addr).await?;

    tokio::select! {
        res = app.join_event_loop() => {
            if let Err(e) = res {
                error!(err = %e, "staker app terminated with a fatal error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    if rpc_handle.stop().is_err() {
        debug!("rpc server already stopped");
    }
    app.stop().await;
    notifier.shutdown();

    info!("staker daemon shutdown complete");
    Ok(())
}

/// Reads and parses a TOML file from the given path into the given type `T`.
fn parse_toml<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: std::fmt::Debug + DeserializeOwned,
{
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    trace!(?raw, "read config file");

    let parsed = toml::from_str::<T>(&raw).context("parse config file")?;
    debug!(?parsed, "parsed config file");

    Ok(parsed)
}
