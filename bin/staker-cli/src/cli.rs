//! Command-line interface of the staker CLI.

use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(
    name = "staker-cli",
    about = "Operator CLI for the staker daemon",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'd',
        help = "JSON-RPC address of the staker daemon",
        default_value = "http://127.0.0.1:9740"
    )]
    pub daemon_address: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Stake funds into a new delegation.
    Stake {
        #[clap(long, help = "Staker address controlled by the daemon wallet")]
        staker_address: String,

        #[clap(long, help = "Amount to stake, in sats")]
        staking_amount: u64,

        #[clap(long, help = "Validator key to delegate to (x-only, hex)")]
        validator_pk: String,

        #[clap(long, help = "Staking time in blocks")]
        staking_time: u16,
    },

    /// Start early unbonding of a delegation.
    Unbond {
        #[clap(help = "Staking transaction id")]
        staking_txid: String,

        #[clap(long, help = "Fee rate for the unbonding tx, in sat/kvB")]
        fee_rate: Option<u64>,
    },

    /// Spend an expired or unbonded stake back to the staker.
    Unstake {
        #[clap(help = "Staking transaction id")]
        staking_txid: String,
    },

    /// Compute the staking output for an externally built transaction.
    StakeOutput {
        #[clap(long, help = "Staker key (x-only, hex)")]
        staker_pk: String,

        #[clap(long, help = "Amount to stake, in sats")]
        staking_amount: u64,

        #[clap(long, help = "Validator key to delegate to (x-only, hex)")]
        validator_pk: String,

        #[clap(long, help = "Staking time in blocks")]
        staking_time: u16,
    },

    /// List tracked staking transactions.
    StoredTransactions {
        #[clap(long, default_value_t = 50)]
        limit: u64,

        #[clap(long, default_value_t = 0)]
        offset: u64,
    },

    /// List staking transactions whose stake is spendable right now.
    WithdrawableTransactions {
        #[clap(long, default_value_t = 50)]
        limit: u64,

        #[clap(long, default_value_t = 0)]
        offset: u64,
    },

    /// List unspent wallet outputs.
    ListUnspent,

    /// List validators registered on the coordinator.
    ListValidators {
        #[clap(long, default_value_t = 50)]
        limit: u64,

        #[clap(long, default_value_t = 0)]
        offset: u64,
    },

    /// Administrative commands that do not need a running daemon.
    #[clap(subcommand)]
    Admin(AdminCommand),
}

#[derive(Debug, Subcommand)]
pub(crate) enum AdminCommand {
    /// Write a default configuration file. Fails if the file exists.
    DumpConfig {
        #[clap(long, default_value = "stakerd.toml")]
        path: PathBuf,
    },

    /// Generate the coordinator keyring file. Fails if the file exists.
    CreateKeyring {
        #[clap(long, default_value = "coordinator.key")]
        path: PathBuf,
    },
}
