//! Daemon configuration, parsed from TOML.

use std::path::PathBuf;

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use staker_db::persistent::DbConfig;

/// The configuration values that dictate the behavior of the staker daemon.
///
/// The network is chosen at startup and immutable for the lifetime of the
/// process; addresses that do not match it are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// The Bitcoin network the daemon operates on.
    pub network: Network,

    /// The directory to store all data in.
    pub datadir: PathBuf,

    /// The JSON-RPC listen address of the daemon.
    pub rpc_addr: String,

    /// Connection to the Bitcoin node used for chain notifications.
    pub btc_node: BtcNodeConfig,

    /// Connection to the Bitcoin Core wallet holding the staker keys.
    pub wallet: WalletConfig,

    /// Connection to the coordinator chain.
    pub coordinator: CoordinatorConfig,

    /// SQLite store configuration.
    pub db: DbConfig,

    /// Fee estimation configuration.
    pub fee: FeeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BtcNodeConfig {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub retry_count: Option<u8>,
    pub retry_interval: Option<u64>,

    /// Chain polling cadence in seconds.
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WalletConfig {
    pub url: String,
    pub user: String,
    pub pass: String,

    /// Wallet passphrase; omit for unencrypted wallets.
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CoordinatorConfig {
    /// JSON-RPC address of the coordinator node.
    pub rpc_addr: String,

    /// Path to the hex-encoded coordinator key file.
    pub keyring_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FeeConfig {
    /// Fixed fee rate in sats per kilo-vbyte.
    pub static_fee_rate_sat_per_kvb: u64,
}
