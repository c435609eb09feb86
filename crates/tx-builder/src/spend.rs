//! Construction of the transaction that pays a stake back to the staker.

use bitcoin::{
    absolute::LockTime,
    secp256k1::{Keypair, Message, Secp256k1},
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, XOnlyPublicKey,
};
use staker_primitives::StakingScriptData;

use crate::{
    error::BuilderError,
    scripts::{script_spend_sighash, timelock_path_witness, StakingPaths},
    staking::check_fee_rate,
    DUST_LIMIT, SPEND_STAKE_TX_VSIZE,
};

/// A fully signed spend-stake transaction and its bookkeeping.
#[derive(Debug, Clone)]
pub struct SpendStakeTx {
    /// The signed transaction, ready for broadcast.
    pub tx: Transaction,

    /// The output being spent (staking or unbonding output).
    pub funding_output: TxOut,

    /// Fee paid by the transaction.
    pub fee: Amount,
}

/// Builds and signs a transaction spending the staking (or unbonding) output
/// back to the staker through the timelock path.
///
/// The fee is computed for an assumed [`SPEND_STAKE_TX_VSIZE`] witness; the
/// input sequence carries the relative timelock so the mempool enforces
/// maturity (a premature broadcast fails with a sequence-lock error).
pub fn build_spend_stake_tx(
    funding_outpoint: OutPoint,
    funding_output: &TxOut,
    script_data: &StakingScriptData,
    destination_script: ScriptBuf,
    fee_rate_per_kvb: Amount,
    staker_keypair: &Keypair,
) -> Result<SpendStakeTx, BuilderError> {
    check_fee_rate(fee_rate_per_kvb)?;

    if XOnlyPublicKey::from_keypair(staker_keypair).0 != script_data.staker_key {
        return Err(BuilderError::StakerKeyMismatch);
    }

    let fee = Amount::from_sat(fee_rate_per_kvb.to_sat() * SPEND_STAKE_TX_VSIZE / 1_000);
    let spend_value = funding_output
        .value
        .checked_sub(fee)
        .ok_or(BuilderError::DustOutput(Amount::ZERO))?;

    if spend_value <= DUST_LIMIT {
        return Err(BuilderError::DustOutput(spend_value));
    }

    let mut tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: funding_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::from_height(script_data.lock_time),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: spend_value,
            script_pubkey: destination_script,
        }],
    };

    let leaf = StakingPaths::new(script_data).timelock_script;
    let sighash = script_spend_sighash(&tx, funding_output, &leaf)?;

    let secp = Secp256k1::new();
    let staker_sig = secp.sign_schnorr(&Message::from_digest(sighash), staker_keypair);
    tx.input[0].witness = timelock_path_witness(script_data, &staker_sig)?;

    Ok(SpendStakeTx {
        tx,
        funding_output: funding_output.clone(),
        fee,
    })
}
