//! Persistent tracking of staking transactions and their lifecycle state.
//!
//! The store is keyed by staking txid and exposes typed state-transition
//! methods that enforce the legal edges of the lifecycle; everything else in
//! the daemon goes through the [`tracker::TransactionTracker`] trait so tests
//! can swap the SQLite backend for the in-memory one.

pub mod errors;
pub mod inmemory;
pub mod persistent;
pub mod tracker;
pub mod types;

pub use errors::{DbError, DbResult};
pub use tracker::TransactionTracker;
pub use types::{
    StoredTransactionQuery, StoredTransactionQueryResult, TrackedTransaction, TxState,
    UnbondingStoreData, WatchedData,
};

#[cfg(test)]
pub(crate) mod test_utils {
    use bitcoin::{
        absolute::LockTime,
        hashes::Hash,
        secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey},
        transaction::Version,
        Amount, BlockHash, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
        XOnlyPublicKey,
    };
    use staker_primitives::{ProofOfPossession, StakingScriptData};

    pub(crate) fn keypair(byte: u8) -> Keypair {
        let secp = Secp256k1::new();
        Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    pub(crate) fn script_data(lock_time: u16) -> StakingScriptData {
        StakingScriptData::new(
            XOnlyPublicKey::from_keypair(&keypair(1)).0,
            XOnlyPublicKey::from_keypair(&keypair(2)).0,
            XOnlyPublicKey::from_keypair(&keypair(3)).0,
            lock_time,
        )
        .unwrap()
    }

    pub(crate) fn signature() -> schnorr::Signature {
        let secp = Secp256k1::new();
        secp.sign_schnorr(&Message::from_digest([9u8; 32]), &keypair(1))
    }

    pub(crate) fn pop() -> ProofOfPossession {
        ProofOfPossession {
            coordinator_sig: vec![0xaa; 64],
            btc_sig: signature(),
        }
    }

    /// A unique staking transaction; `salt` varies the input so txids differ.
    pub(crate) fn staking_tx(salt: u32, amount: u64) -> Transaction {
        Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: bitcoin::Txid::all_zeros(),
                    vout: salt,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(amount),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    pub(crate) fn block_hash(byte: u8) -> BlockHash {
        BlockHash::from_byte_array([byte; 32])
    }
}
