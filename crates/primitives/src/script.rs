//! The structured commitment behind a staking output.
//!
//! A staking output commits to three parties (staker, validator, jury) and a
//! relative timelock. The taproot leaf scripts are derived deterministically
//! from this data, so the daemon persists the data itself rather than raw
//! script bytes and rebuilds the scripts whenever it needs to spend.

use bitcoin::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when assembling a [`StakingScriptData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScriptDataError {
    /// The staker, validator and jury keys must be pairwise distinct.
    #[error("staking script keys must be pairwise distinct")]
    DuplicateKeys,

    /// A zero timelock would make the staking output immediately spendable.
    #[error("staking timelock must be non-zero")]
    ZeroLockTime,
}

/// Keys and timelock committed to by a staking (or unbonding) output.
///
/// `lock_time` is a relative lock in blocks, enforced with
/// `OP_CHECKSEQUENCEVERIFY` on the timelock spending path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingScriptData {
    /// The staker's Bitcoin key. Present on every spending path.
    pub staker_key: XOnlyPublicKey,

    /// The validator the stake is delegated to.
    pub validator_key: XOnlyPublicKey,

    /// The jury key required to co-sign early exits and slashing.
    pub jury_key: XOnlyPublicKey,

    /// Relative timelock in blocks for the unilateral staker exit.
    pub lock_time: u16,
}

impl StakingScriptData {
    /// Validates and assembles the script commitment.
    pub fn new(
        staker_key: XOnlyPublicKey,
        validator_key: XOnlyPublicKey,
        jury_key: XOnlyPublicKey,
        lock_time: u16,
    ) -> Result<Self, ScriptDataError> {
        if staker_key == validator_key || staker_key == jury_key || validator_key == jury_key {
            return Err(ScriptDataError::DuplicateKeys);
        }

        if lock_time == 0 {
            return Err(ScriptDataError::ZeroLockTime);
        }

        Ok(Self {
            staker_key,
            validator_key,
            jury_key,
            lock_time,
        })
    }

    /// The commitment for the unbonding output of this stake: same key set,
    /// shorter timelock.
    pub fn with_lock_time(&self, lock_time: u16) -> Result<Self, ScriptDataError> {
        Self::new(
            self.staker_key,
            self.validator_key,
            self.jury_key,
            lock_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = StakingScriptData::new(key(1), key(1), key(2), 100).unwrap_err();
        assert_eq!(err, ScriptDataError::DuplicateKeys);
    }

    #[test]
    fn rejects_zero_lock_time() {
        let err = StakingScriptData::new(key(1), key(2), key(3), 0).unwrap_err();
        assert_eq!(err, ScriptDataError::ZeroLockTime);
    }

    #[test]
    fn serde_round_trip() {
        let data = StakingScriptData::new(key(1), key(2), key(3), 1_000).unwrap();
        let encoded = bincode::serialize(&data).unwrap();
        let decoded: StakingScriptData = bincode::deserialize(&encoded).unwrap();
        assert_eq!(data, decoded);
        // sanity check a known-good key parse as well
        assert!(XOnlyPublicKey::from_str(
            "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0"
        )
        .is_ok());
    }
}
