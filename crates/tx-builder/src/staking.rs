//! Staking output construction and request policies.

use bitcoin::{Amount, TxOut};
use staker_primitives::StakingScriptData;

use crate::{error::BuilderError, scripts, MIN_FEE_PER_KB, MIN_SLASHING_FEE};

/// Builds the staked output for a script commitment.
pub fn staking_output(
    script_data: &StakingScriptData,
    staking_amount: Amount,
) -> Result<TxOut, BuilderError> {
    Ok(TxOut {
        value: staking_amount,
        script_pubkey: scripts::staking_script_pubkey(script_data)?,
    })
}

/// The minimum accepted staking time.
///
/// The coordinator's own minimum is `k + w` (confirmation depth plus
/// finalization timeout), but a delegation staked for exactly that long would
/// have voting power for zero blocks. Requiring `2w + k` guarantees at least
/// `w` blocks of active stake.
pub fn min_staking_time(finalization_timeout_blocks: u16, confirmation_depth: u16) -> u32 {
    2 * finalization_timeout_blocks as u32 + confirmation_depth as u32
}

/// The slashing fee actually used: the coordinator-reported fee, floored at
/// [`MIN_SLASHING_FEE`].
pub fn effective_slashing_fee(coordinator_fee: Amount) -> Amount {
    coordinator_fee.max(MIN_SLASHING_FEE)
}

/// Rejects staking amounts that do not strictly exceed the slashing fee.
pub fn check_staking_amount(amount: Amount, slashing_fee: Amount) -> Result<(), BuilderError> {
    if amount <= slashing_fee {
        return Err(BuilderError::StakingAmountTooLow {
            amount,
            fee: slashing_fee,
        });
    }
    Ok(())
}

/// Rejects staking times below [`min_staking_time`].
pub fn check_staking_time(
    staking_time_blocks: u16,
    finalization_timeout_blocks: u16,
    confirmation_depth: u16,
) -> Result<(), BuilderError> {
    let min = min_staking_time(finalization_timeout_blocks, confirmation_depth);
    if (staking_time_blocks as u32) < min {
        return Err(BuilderError::StakingTimeTooShort {
            got: staking_time_blocks as u32,
            min,
        });
    }
    Ok(())
}

/// Rejects fee rates below the relay floor of 1 sat/vB.
pub fn check_fee_rate(fee_rate_per_kvb: Amount) -> Result<(), BuilderError> {
    if fee_rate_per_kvb < MIN_FEE_PER_KB {
        return Err(BuilderError::FeeRateTooLow {
            got: fee_rate_per_kvb,
            min: MIN_FEE_PER_KB,
        });
    }
    Ok(())
}
