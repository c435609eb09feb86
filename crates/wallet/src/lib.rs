//! Wallet access for the staker daemon.
//!
//! The [`WalletController`] trait is the only surface the engine sees:
//! private keys are fetched on demand behind a timed unlock and never cached.
//! The [`rpc::RpcWallet`] implementation talks to a Bitcoin Core wallet.

pub mod controller;
pub mod rpc;

pub use controller::{TxInclusionInfo, TxStatus, Utxo, WalletController, WalletError, WalletResult};
pub use rpc::RpcWallet;
