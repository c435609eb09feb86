//! Construction of the unbonding transaction and undelegation payload.

use bitcoin::{
    absolute::LockTime,
    secp256k1::{Keypair, Message, Secp256k1},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, XOnlyPublicKey,
};
use staker_primitives::{StakingScriptData, UndelegationData};

use crate::{
    error::BuilderError,
    scripts::{script_spend_sighash, staking_script_pubkey, StakingPaths},
    staking::check_fee_rate,
    DUST_LIMIT, UNBONDING_TX_VSIZE,
};

/// Fee for the unbonding transaction at the given rate, assuming
/// [`UNBONDING_TX_VSIZE`].
pub fn unbonding_tx_fee(fee_rate_per_kvb: Amount) -> Amount {
    Amount::from_sat(fee_rate_per_kvb.to_sat() * UNBONDING_TX_VSIZE / 1_000)
}

/// Builds the unbonding transaction spending the staked output through the
/// unbonding path, locks its output under the same key set with the shorter
/// `unbonding_lock_time`, and signs it with the staker key.
///
/// The returned [`UndelegationData`] is what gets submitted to the
/// coordinator; the jury and validator signatures arrive later.
pub fn build_undelegation_data(
    staking_tx: &Transaction,
    staking_output_index: u32,
    script_data: &StakingScriptData,
    unbonding_lock_time: u16,
    fee_rate_per_kvb: Amount,
    staker_keypair: &Keypair,
) -> Result<UndelegationData, BuilderError> {
    check_fee_rate(fee_rate_per_kvb)?;

    let staking_output = staking_tx
        .output
        .get(staking_output_index as usize)
        .ok_or(BuilderError::InvalidOutputIndex {
            index: staking_output_index,
            outputs: staking_tx.output.len(),
        })?;

    if XOnlyPublicKey::from_keypair(staker_keypair).0 != script_data.staker_key {
        return Err(BuilderError::StakerKeyMismatch);
    }

    let fee = unbonding_tx_fee(fee_rate_per_kvb);
    let unbonding_value = staking_output
        .value
        .checked_sub(fee)
        .ok_or(BuilderError::DustOutput(Amount::ZERO))?;

    if unbonding_value <= DUST_LIMIT {
        return Err(BuilderError::DustOutput(unbonding_value));
    }

    let unbonding_script_data = script_data.with_lock_time(unbonding_lock_time)?;

    let unbonding_tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: staking_tx.compute_txid(),
                vout: staking_output_index,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: unbonding_value,
            script_pubkey: staking_script_pubkey(&unbonding_script_data)?,
        }],
    };

    let leaf = StakingPaths::new(script_data).unbonding_script;
    let sighash = script_spend_sighash(&unbonding_tx, staking_output, &leaf)?;

    let secp = Secp256k1::new();
    let staker_unbonding_sig = secp.sign_schnorr(&Message::from_digest(sighash), staker_keypair);

    Ok(UndelegationData {
        unbonding_tx,
        script_data: unbonding_script_data,
        staker_unbonding_sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scripts::tests::{test_keypair, test_script_data},
        staking::staking_output,
        MIN_FEE_PER_KB,
    };

    fn staking_tx(amount: Amount, data: &StakingScriptData) -> Transaction {
        Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![staking_output(data, amount).unwrap()],
        }
    }

    #[test]
    fn output_locked_under_shorter_timelock() {
        let data = test_script_data(1_000);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let undelegation = build_undelegation_data(
            &tx,
            0,
            &data,
            100,
            Amount::from_sat(2_000),
            &test_keypair(1),
        )
        .unwrap();

        assert_eq!(undelegation.script_data.lock_time, 100);
        assert_eq!(
            undelegation.unbonding_tx.output[0].script_pubkey,
            staking_script_pubkey(&undelegation.script_data).unwrap()
        );
        // 2000 sat/kvB * 200 vB = 400 sats of fee
        assert_eq!(
            undelegation.unbonding_tx.output[0].value,
            Amount::from_sat(99_600)
        );
    }

    #[test]
    fn staker_signature_covers_unbonding_path() {
        let data = test_script_data(1_000);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let undelegation =
            build_undelegation_data(&tx, 0, &data, 100, MIN_FEE_PER_KB, &test_keypair(1)).unwrap();

        let leaf = StakingPaths::new(&data).unbonding_script;
        let sighash =
            script_spend_sighash(&undelegation.unbonding_tx, &tx.output[0], &leaf).unwrap();
        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(
            &undelegation.staker_unbonding_sig,
            &Message::from_digest(sighash),
            &data.staker_key,
        )
        .expect("staker unbonding signature must verify");
    }

    #[test]
    fn rejects_fee_rate_below_floor() {
        let data = test_script_data(1_000);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let err = build_undelegation_data(
            &tx,
            0,
            &data,
            100,
            Amount::from_sat(999),
            &test_keypair(1),
        )
        .unwrap_err();
        assert!(matches!(err, BuilderError::FeeRateTooLow { .. }));
    }

    #[test]
    fn rejects_dust_unbonding_output() {
        let data = test_script_data(1_000);
        let tx = staking_tx(Amount::from_sat(700), &data);

        let err = build_undelegation_data(&tx, 0, &data, 100, MIN_FEE_PER_KB, &test_keypair(1))
            .unwrap_err();
        assert!(matches!(err, BuilderError::DustOutput(_)));
    }
}
