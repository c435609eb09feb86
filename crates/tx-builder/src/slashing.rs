//! Construction of the pre-signed slashing transaction.

use bitcoin::{
    absolute::LockTime,
    secp256k1::{schnorr, Keypair, Message, Secp256k1},
    transaction::Version,
    OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, XOnlyPublicKey,
};
use staker_primitives::StakingScriptData;

use crate::{
    error::BuilderError,
    scripts::{script_spend_sighash, StakingPaths},
    DUST_LIMIT,
};

/// A slashing transaction together with the staker's pre-signature over the
/// slashing path.
#[derive(Debug, Clone)]
pub struct SignedSlashingTx {
    /// The unsigned slashing transaction (witness is attached by the
    /// coordinator once it holds the validator and jury co-signatures
    /// alongside the staker pre-signature).
    pub tx: Transaction,

    /// The staker's Schnorr signature over the slashing path.
    pub staker_sig: schnorr::Signature,
}

/// Builds the slashing transaction spending the staked output and pre-signs
/// it with the staker key.
///
/// The single output pays `staking_amount - slashing_fee` to the
/// coordinator's slashing address. The fee must already be floored via
/// [`crate::staking::effective_slashing_fee`].
pub fn build_slashing_tx(
    staking_tx: &Transaction,
    staking_output_index: u32,
    script_data: &StakingScriptData,
    slashing_script_pubkey: ScriptBuf,
    slashing_fee: bitcoin::Amount,
    staker_keypair: &Keypair,
) -> Result<SignedSlashingTx, BuilderError> {
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

    let slashed_value = staking_output
        .value
        .checked_sub(slashing_fee)
        .ok_or(BuilderError::StakingAmountTooLow {
            amount: staking_output.value,
            fee: slashing_fee,
        })?;

    if slashed_value <= DUST_LIMIT {
        return Err(BuilderError::DustOutput(slashed_value));
    }

    let tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: staking_tx.compute_txid(),
                vout: staking_output_index,
            },
            script_sig: ScriptBuf::new(),
            // not replaceable
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: slashed_value,
            script_pubkey: slashing_script_pubkey,
        }],
    };

    let leaf = StakingPaths::new(script_data).slashing_script;
    let sighash = script_spend_sighash(&tx, staking_output, &leaf)?;

    let secp = Secp256k1::new();
    let staker_sig = secp.sign_schnorr(&Message::from_digest(sighash), staker_keypair);

    Ok(SignedSlashingTx { tx, staker_sig })
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;

    use super::*;
    use crate::{
        scripts::tests::{test_keypair, test_script_data},
        staking::staking_output,
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
    fn pays_amount_minus_fee_to_slashing_address() {
        let data = test_script_data(300);
        let tx = staking_tx(Amount::from_sat(100_000), &data);
        let slashing_spk = ScriptBuf::new_op_return([0u8; 4]);

        let slashing = build_slashing_tx(
            &tx,
            0,
            &data,
            slashing_spk.clone(),
            Amount::from_sat(1_000),
            &test_keypair(1),
        )
        .unwrap();

        assert_eq!(slashing.tx.output.len(), 1);
        assert_eq!(slashing.tx.output[0].value, Amount::from_sat(99_000));
        assert_eq!(slashing.tx.output[0].script_pubkey, slashing_spk);
        assert_eq!(
            slashing.tx.input[0].previous_output.txid,
            tx.compute_txid()
        );
        assert_eq!(slashing.tx.input[0].sequence, Sequence::MAX);
    }

    #[test]
    fn pre_signature_verifies_against_slashing_path() {
        let data = test_script_data(300);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let slashing = build_slashing_tx(
            &tx,
            0,
            &data,
            ScriptBuf::new_op_return([0u8; 4]),
            Amount::from_sat(1_000),
            &test_keypair(1),
        )
        .unwrap();

        let leaf = StakingPaths::new(&data).slashing_script;
        let sighash = script_spend_sighash(&slashing.tx, &tx.output[0], &leaf).unwrap();
        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(
            &slashing.staker_sig,
            &Message::from_digest(sighash),
            &data.staker_key,
        )
        .expect("staker pre-signature must verify");
    }

    #[test]
    fn rejects_wrong_signing_key() {
        let data = test_script_data(300);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let err = build_slashing_tx(
            &tx,
            0,
            &data,
            ScriptBuf::new_op_return([0u8; 4]),
            Amount::from_sat(1_000),
            &test_keypair(9),
        )
        .unwrap_err();
        assert_eq!(err, BuilderError::StakerKeyMismatch);
    }

    #[test]
    fn rejects_out_of_bounds_output() {
        let data = test_script_data(300);
        let tx = staking_tx(Amount::from_sat(100_000), &data);

        let err = build_slashing_tx(
            &tx,
            5,
            &data,
            ScriptBuf::new_op_return([0u8; 4]),
            Amount::from_sat(1_000),
            &test_keypair(1),
        )
        .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidOutputIndex { .. }));
    }
}
