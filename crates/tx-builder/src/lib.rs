//! Pure construction of the Bitcoin transactions and scripts that make up a
//! staking delegation: the staking output, the pre-signed slashing
//! transaction, the unbonding transaction, the spend-stake transaction, path
//! witnesses, proof-of-possession and merkle inclusion proofs.
//!
//! Nothing in this crate performs I/O; the engine feeds it wallet keys and
//! coordinator parameters and persists or broadcasts whatever comes out.

use bitcoin::Amount;

pub mod error;
pub mod pop;
pub mod proof;
pub mod scripts;
pub mod slashing;
pub mod spend;
pub mod staking;
pub mod unbonding;

pub use error::BuilderError;

/// Internal floor for the slashing fee in case the coordinator reports one
/// that is too small. A slashing transaction is roughly 113 vbytes; at
/// 8 sat/vB that is ~904 sats, rounded up to 1000.
pub const MIN_SLASHING_FEE: Amount = Amount::from_sat(1_000);

/// Minimum accepted fee rate, in sats per kilo-vbyte. Matches the default
/// relay fee policy of 1 sat/vB.
pub const MIN_FEE_PER_KB: Amount = Amount::from_sat(1_000);

/// Assumed virtual size of a transaction spending a staking output through
/// one of its script paths. The real size depends on the destination address
/// type (p2pk 222 vB, p2wpkh 177 vB, p2tr 189 vB); 180 vB assumes one of the
/// more recent address types. The witness carries up to three signatures,
/// the leaf script and the taproot control block.
pub const SPEND_STAKE_TX_VSIZE: u64 = 180;

/// Assumed virtual size of the unbonding transaction, used to derive its fee
/// from a sats-per-kvB rate. One taproot script-path input with three
/// signatures plus one taproot output.
pub const UNBONDING_TX_VSIZE: u64 = 200;

/// Outputs at or below this value are considered dust and rejected.
pub const DUST_LIMIT: Amount = Amount::from_sat(546);
