//! Operator CLI for the staker daemon.

use std::process::exit;

use clap::Parser;

use crate::cli::{AdminCommand, Cli, Command};

mod cli;
mod handlers;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let daemon = cli.daemon_address.as_str();

    match cli.command {
        Command::Stake {
            staker_address,
            staking_amount,
            validator_pk,
            staking_time,
        } => {
            handlers::daemon::stake(
                daemon,
                staker_address,
                staking_amount,
                &validator_pk,
                staking_time,
            )
            .await
        }
        Command::Unbond {
            staking_txid,
            fee_rate,
        } => handlers::daemon::unbond(daemon, &staking_txid, fee_rate).await,
        Command::Unstake { staking_txid } => {
            handlers::daemon::unstake(daemon, &staking_txid).await
        }
        Command::StakeOutput {
            staker_pk,
            staking_amount,
            validator_pk,
            staking_time,
        } => {
            handlers::daemon::stake_output(
                daemon,
                &staker_pk,
                staking_amount,
                &validator_pk,
                staking_time,
            )
            .await
        }
        Command::StoredTransactions { limit, offset } => {
            handlers::daemon::stored_transactions(daemon, limit, offset).await
        }
        Command::WithdrawableTransactions { limit, offset } => {
            handlers::daemon::withdrawable_transactions(daemon, limit, offset).await
        }
        Command::ListUnspent => handlers::daemon::list_unspent(daemon).await,
        Command::ListValidators { limit, offset } => {
            handlers::daemon::list_validators(daemon, limit, offset).await
        }
        Command::Admin(admin) => match admin {
            AdminCommand::DumpConfig { path } => handlers::admin::dump_config(&path),
            AdminCommand::CreateKeyring { path } => handlers::admin::create_keyring(&path),
        },
    }
}
