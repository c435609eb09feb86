//! Proof-of-possession construction.

use bitcoin::{
    hashes::{sha256, Hash},
    secp256k1::{Keypair, Message, Secp256k1},
    XOnlyPublicKey,
};
use staker_primitives::ProofOfPossession;

/// The payload the coordinator signs to start a proof-of-possession: the
/// Schnorr-serialized staker Bitcoin key.
pub fn pop_payload(staker_keypair: &Keypair) -> [u8; 32] {
    XOnlyPublicKey::from_keypair(staker_keypair).0.serialize()
}

/// Completes the proof-of-possession by signing the sha256 hash of the
/// coordinator's signature with the staker Bitcoin key.
pub fn build_proof_of_possession(
    staker_keypair: &Keypair,
    coordinator_sig: Vec<u8>,
) -> ProofOfPossession {
    let digest = sha256::Hash::hash(&coordinator_sig).to_byte_array();

    let secp = Secp256k1::new();
    let btc_sig = secp.sign_schnorr(&Message::from_digest(digest), staker_keypair);

    ProofOfPossession {
        coordinator_sig,
        btc_sig,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::tests::test_keypair;

    #[test]
    fn btc_sig_covers_hash_of_coordinator_sig() {
        let kp = test_keypair(1);
        let coordinator_sig = vec![0xaa; 64];
        let pop = build_proof_of_possession(&kp, coordinator_sig.clone());

        let digest = sha256::Hash::hash(&coordinator_sig).to_byte_array();
        let secp = Secp256k1::verification_only();
        secp.verify_schnorr(
            &pop.btc_sig,
            &Message::from_digest(digest),
            &XOnlyPublicKey::from_keypair(&kp).0,
        )
        .expect("pop signature must verify");
        assert_eq!(pop.coordinator_sig, coordinator_sig);
    }
}
