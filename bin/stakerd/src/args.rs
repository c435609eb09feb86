//! Command-line arguments for the staker daemon.

use std::path::PathBuf;

use clap::{crate_version, Parser};

#[derive(Debug, Parser)]
#[clap(
    name = "stakerd",
    about = "Daemon managing Bitcoin staking delegations",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'c',
        help = "The file containing the daemon configuration",
        default_value = "stakerd.toml"
    )]
    pub config: PathBuf,
}
