//! Leaf scripts and taproot assembly for staking outputs.
//!
//! A staking output is a taproot output with an unspendable internal key and
//! three script paths:
//!
//! * timelock path: `<staker> OP_CHECKSIGVERIFY <lock_time> OP_CSV`, the
//!   unilateral staker exit once the lock expires;
//! * unbonding path: `<staker> OP_CHECKSIGVERIFY <validator>
//!   OP_CHECKSIGVERIFY <jury> OP_CHECKSIG`, the co-signed early exit;
//! * slashing path: `<staker> OP_CHECKSIGVERIFY <validator>
//!   OP_CHECKSIGVERIFY <jury> OP_CHECKSIG`, spent by the coordinator with
//!   the staker's pre-signature and the validator and jury co-signatures.
//!
//! Unbonding outputs reuse the same shape with a shorter timelock.

use std::str::FromStr;

use bitcoin::{
    opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CSV},
    script::Builder,
    secp256k1::{schnorr, PublicKey, Secp256k1},
    sighash::{Prevouts, SighashCache},
    taproot::{LeafVersion, TaprootBuilder, TaprootSpendInfo},
    Script, ScriptBuf, TapSighashType, Transaction, TxOut, Witness, XOnlyPublicKey,
};
use staker_primitives::StakingScriptData;

use crate::error::BuilderError;

/// The BIP-341 "nothing up my sleeve" point. Key-path spending of a staking
/// output must be impossible.
const UNSPENDABLE_KEY: &str = "0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

fn unspendable_internal_key() -> XOnlyPublicKey {
    PublicKey::from_str(UNSPENDABLE_KEY)
        .expect("unspendable key constant must be valid")
        .x_only_public_key()
        .0
}

/// The three leaf scripts of a staking output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingPaths {
    /// Unilateral staker exit after the relative timelock.
    pub timelock_script: ScriptBuf,

    /// Co-signed early exit: staker, validator and jury all sign.
    pub unbonding_script: ScriptBuf,

    /// Slashing: the staker's pre-signature plus validator and jury
    /// co-signatures.
    pub slashing_script: ScriptBuf,
}

impl StakingPaths {
    /// Derives the leaf scripts from a script commitment.
    pub fn new(data: &StakingScriptData) -> Self {
        let timelock_script = Builder::new()
            .push_slice(data.staker_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_int(data.lock_time as i64)
            .push_opcode(OP_CSV)
            .into_script();

        let unbonding_script = Builder::new()
            .push_slice(data.staker_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_slice(data.validator_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_slice(data.jury_key.serialize())
            .push_opcode(OP_CHECKSIG)
            .into_script();

        let slashing_script = Builder::new()
            .push_slice(data.staker_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_slice(data.validator_key.serialize())
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_slice(data.jury_key.serialize())
            .push_opcode(OP_CHECKSIG)
            .into_script();

        Self {
            timelock_script,
            unbonding_script,
            slashing_script,
        }
    }
}

/// Assembles the taproot tree for a script commitment. The timelock path sits
/// at depth 1, the two co-signed paths at depth 2.
pub fn taproot_spend_info(data: &StakingScriptData) -> Result<TaprootSpendInfo, BuilderError> {
    let secp = Secp256k1::verification_only();
    let paths = StakingPaths::new(data);

    TaprootBuilder::new()
        .add_leaf(1, paths.timelock_script)
        .and_then(|b| b.add_leaf(2, paths.unbonding_script))
        .and_then(|b| b.add_leaf(2, paths.slashing_script))
        .map_err(|_| BuilderError::TaprootAssembly)?
        .finalize(&secp, unspendable_internal_key())
        .map_err(|_| BuilderError::TaprootAssembly)
}

/// The script pubkey of the staking (or unbonding) output for a commitment.
pub fn staking_script_pubkey(data: &StakingScriptData) -> Result<ScriptBuf, BuilderError> {
    let secp = Secp256k1::verification_only();
    let spend_info = taproot_spend_info(data)?;

    Ok(ScriptBuf::new_p2tr(
        &secp,
        spend_info.internal_key(),
        spend_info.merkle_root(),
    ))
}

fn control_block_bytes(
    spend_info: &TaprootSpendInfo,
    leaf_script: &ScriptBuf,
) -> Result<Vec<u8>, BuilderError> {
    spend_info
        .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
        .map(|cb| cb.serialize())
        .ok_or(BuilderError::TaprootAssembly)
}

/// Computes the taproot script-spend sighash of `tx` for the given leaf,
/// assuming the single input spends `funding_output`.
pub fn script_spend_sighash(
    tx: &Transaction,
    funding_output: &TxOut,
    leaf_script: &Script,
) -> Result<[u8; 32], BuilderError> {
    use bitcoin::hashes::Hash;

    let leaf_hash = leaf_script.tapscript_leaf_hash();
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&[funding_output]),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| BuilderError::Sighash(e.to_string()))?;

    Ok(sighash.to_raw_hash().to_byte_array())
}

/// Witness for the timelock path: `[staker_sig, leaf, control_block]`.
pub fn timelock_path_witness(
    data: &StakingScriptData,
    staker_sig: &schnorr::Signature,
) -> Result<Witness, BuilderError> {
    let spend_info = taproot_spend_info(data)?;
    let leaf = StakingPaths::new(data).timelock_script;
    let control_block = control_block_bytes(&spend_info, &leaf)?;

    let mut witness = Witness::new();
    witness.push(staker_sig.as_ref());
    witness.push(leaf.as_bytes());
    witness.push(&control_block);
    Ok(witness)
}

/// Witness for the unbonding path. Signatures are consumed by the script from
/// the top of the stack, so the staker signature is pushed last.
pub fn unbonding_path_witness(
    data: &StakingScriptData,
    staker_sig: &schnorr::Signature,
    validator_sig: &schnorr::Signature,
    jury_sig: &schnorr::Signature,
) -> Result<Witness, BuilderError> {
    let spend_info = taproot_spend_info(data)?;
    let leaf = StakingPaths::new(data).unbonding_script;
    let control_block = control_block_bytes(&spend_info, &leaf)?;

    let mut witness = Witness::new();
    witness.push(jury_sig.as_ref());
    witness.push(validator_sig.as_ref());
    witness.push(staker_sig.as_ref());
    witness.push(leaf.as_bytes());
    witness.push(&control_block);
    Ok(witness)
}
