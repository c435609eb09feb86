//! Merkle inclusion proofs for confirmed staking transactions.

use bitcoin::{consensus, merkle_tree::PartialMerkleTree, Block, Txid};
use staker_primitives::InclusionProof;

use crate::error::BuilderError;

/// Builds the merkle inclusion proof for `txid` inside `block`.
pub fn build_inclusion_proof(block: &Block, txid: Txid) -> Result<InclusionProof, BuilderError> {
    let txids: Vec<Txid> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();

    let tx_index = txids
        .iter()
        .position(|id| *id == txid)
        .ok_or(BuilderError::TxNotInBlock(txid))? as u32;

    let matches: Vec<bool> = txids.iter().map(|id| *id == txid).collect();
    let tree = PartialMerkleTree::from_txids(&txids, &matches);

    Ok(InclusionProof {
        block_hash: block.block_hash(),
        tx_index,
        proof: consensus::serialize(&tree),
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        absolute::LockTime,
        block::{Header, Version as BlockVersion},
        hashes::Hash,
        transaction::Version,
        Amount, CompactTarget, ScriptBuf, Transaction, TxMerkleNode, TxOut,
    };

    use super::*;

    fn dummy_tx(value: u64) -> Transaction {
        Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn dummy_block(txs: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                version: BlockVersion::TWO,
                prev_blockhash: Hash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 0,
                bits: CompactTarget::from_consensus(0),
                nonce: 0,
            },
            txdata: txs,
        }
    }

    #[test]
    fn proof_round_trips_and_matches_the_tx() {
        let txs = vec![dummy_tx(1), dummy_tx(2), dummy_tx(3)];
        let wanted = txs[1].compute_txid();
        let block = dummy_block(txs);

        let proof = build_inclusion_proof(&block, wanted).unwrap();
        assert_eq!(proof.tx_index, 1);
        assert_eq!(proof.block_hash, block.block_hash());

        let tree: PartialMerkleTree = consensus::deserialize(&proof.proof).unwrap();
        let mut matched = vec![];
        let mut indexes = vec![];
        tree.extract_matches(&mut matched, &mut indexes).unwrap();
        assert_eq!(matched, vec![wanted]);
        assert_eq!(indexes, vec![1]);
    }

    #[test]
    fn missing_tx_is_an_error() {
        let block = dummy_block(vec![dummy_tx(1)]);
        let missing = dummy_tx(99).compute_txid();
        assert!(matches!(
            build_inclusion_proof(&block, missing),
            Err(BuilderError::TxNotInBlock(_))
        ));
    }
}
