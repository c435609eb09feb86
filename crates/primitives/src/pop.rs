//! Proof that one principal controls both the staker Bitcoin key and the
//! staker coordinator key.

use bitcoin::secp256k1::schnorr;
use serde::{Deserialize, Serialize};

/// Proof-of-possession bundle submitted alongside a delegation.
///
/// `coordinator_sig` is the coordinator-chain signature over the serialized
/// staker Bitcoin key; `btc_sig` is the staker's Schnorr signature over the
/// sha256 hash of `coordinator_sig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfPossession {
    /// Coordinator-chain signature over the Schnorr-serialized staker key.
    pub coordinator_sig: Vec<u8>,

    /// Bitcoin Schnorr signature over `sha256(coordinator_sig)`.
    pub btc_sig: schnorr::Signature,
}
