//! The staking lifecycle engine.
//!
//! [`app::StakerApp`] owns every adapter (wallet, chain notifier, coordinator
//! client, fee estimator, transaction store) and drives each delegation
//! through its lifecycle from a single event loop. Helper tasks wait on chain
//! and coordinator events and feed results back over channels; the loop is
//! the only writer of delegation state.

use std::time::Duration;

pub mod app;
pub mod errors;
mod events;
pub mod fee;
pub mod reconciler;
mod util;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use app::StakerApp;
pub use errors::EngineError;
pub use fee::{FeeEstimator, StaticFeeEstimator};

/// Maximum number of delegations waiting to be sent to the coordinator at
/// the same time. Channels fed by confirmation watchers are buffered to this
/// size so producers never block.
pub const MAX_PENDING_DELEGATIONS: usize = 100;

/// Confirmations after which a transaction spending a staking output is
/// considered settled.
pub const SPEND_STAKE_TX_CONFIRMATIONS: u32 = 3;

/// How long to wait for spend confirmations before giving up. Two hours is a
/// reasonable bound given the probabilistic nature of Bitcoin inclusion.
pub const SPEND_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Wallet unlock window for operations that need the private key.
pub const WALLET_UNLOCK_TIMEOUT_SECS: u64 = 15;

/// Confirmations after which the unbonding transaction is considered settled.
pub const UNBONDING_TX_CONFIRMATIONS: u32 = 6;

/// Retry cadence for broadcasting the unbonding transaction and registering
/// its confirmation watch.
pub const UNBONDING_SEND_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Polling cadence for unbonding co-signatures on the coordinator.
pub const UNBONDING_SIGNATURES_POLL_INTERVAL: Duration = Duration::from_secs(10);
