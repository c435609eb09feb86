//! In-memory [`TransactionTracker`] with the same transition semantics as the
//! SQLite backend.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bitcoin::{secp256k1::schnorr, BlockHash, Transaction, Txid};
use staker_primitives::{ProofOfPossession, StakingScriptData};
use tokio::sync::RwLock;

use crate::{
    errors::{DbError, DbResult},
    tracker::{ScanReset, ScanVisitor, TransactionTracker},
    types::{
        StoredTransactionQuery, StoredTransactionQueryResult, TrackedTransaction, TxState,
        WatchedData,
    },
};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<Txid, TrackedTransaction>,
    // preserves insertion order for pagination
    order: Vec<Txid>,
}

/// In-memory implementation of the transaction store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracker {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, record: TrackedTransaction) -> DbResult<()> {
        let txid = record.staking_txid();
        let mut inner = self.inner.write().await;

        if inner.records.contains_key(&txid) {
            return Err(DbError::DuplicateKey(txid));
        }

        inner.order.push(txid);
        inner.records.insert(txid, record);
        Ok(())
    }

    async fn with_record<F>(&self, staking_txid: &Txid, mutate: F) -> DbResult<()>
    where
        F: FnOnce(&mut TrackedTransaction) -> DbResult<()> + Send,
    {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(staking_txid)
            .ok_or(DbError::NotFound(*staking_txid))?;
        mutate(record)
    }
}

#[async_trait]
impl TransactionTracker for InMemoryTracker {
    async fn add_transaction(
        &self,
        staking_tx: Transaction,
        staking_output_index: u32,
        script_data: StakingScriptData,
        pop: ProofOfPossession,
        staker_address: String,
    ) -> DbResult<()> {
        self.insert(TrackedTransaction {
            staking_tx,
            staking_output_index,
            script_data,
            staker_address,
            pop,
            watched: None,
            state: TxState::SentToBtc,
            btc_inclusion: None,
            unbonding: None,
        })
        .await
    }

    async fn add_watched_transaction(
        &self,
        staking_tx: Transaction,
        staking_output_index: u32,
        script_data: StakingScriptData,
        pop: ProofOfPossession,
        staker_address: String,
        watched: WatchedData,
    ) -> DbResult<()> {
        self.insert(TrackedTransaction {
            staking_tx,
            staking_output_index,
            script_data,
            staker_address,
            pop,
            watched: Some(watched),
            state: TxState::SentToBtc,
            btc_inclusion: None,
            unbonding: None,
        })
        .await
    }

    async fn get_transaction(&self, staking_txid: &Txid) -> DbResult<TrackedTransaction> {
        self.inner
            .read()
            .await
            .records
            .get(staking_txid)
            .cloned()
            .ok_or(DbError::NotFound(*staking_txid))
    }

    async fn scan_tracked_transactions(
        &self,
        visit: ScanVisitor<'_>,
        reset: ScanReset<'_>,
    ) -> DbResult<()> {
        let snapshot: Vec<TrackedTransaction> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|txid| inner.records.get(txid).cloned())
                .collect()
        };

        reset();
        for record in &snapshot {
            visit(record)?;
        }
        Ok(())
    }

    async fn query_stored_transactions(
        &self,
        query: StoredTransactionQuery,
    ) -> DbResult<StoredTransactionQueryResult> {
        let inner = self.inner.read().await;

        let mut records: Vec<TrackedTransaction> = inner
            .order
            .iter()
            .filter_map(|txid| inner.records.get(txid).cloned())
            .collect();

        if query.reversed {
            records.reverse();
        }

        if let Some(height) = query.withdrawable_at_height {
            records.retain(|r| r.is_withdrawable_at(height));
        }

        let total = records.len() as u64;
        let transactions = records
            .into_iter()
            .skip(query.index_offset as usize)
            .take(query.num_max_transactions as usize)
            .collect();

        Ok(StoredTransactionQueryResult {
            transactions,
            total,
        })
    }

    async fn set_confirmed(
        &self,
        staking_txid: &Txid,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()> {
        self.with_record(staking_txid, |record| {
            record.transition_confirmed(block_hash, block_height)
        })
        .await
    }

    async fn set_sent_to_coordinator(&self, staking_txid: &Txid) -> DbResult<()> {
        self.with_record(staking_txid, |record| record.transition_sent_to_coordinator())
            .await
    }

    async fn set_unbonding_started(
        &self,
        staking_txid: &Txid,
        unbonding_tx: Transaction,
        script_data: StakingScriptData,
    ) -> DbResult<()> {
        self.with_record(staking_txid, |record| {
            record.transition_unbonding_started(unbonding_tx, script_data)
        })
        .await
    }

    async fn set_unbonding_signatures_received(
        &self,
        staking_txid: &Txid,
        validator_sig: schnorr::Signature,
        jury_sig: schnorr::Signature,
    ) -> DbResult<()> {
        self.with_record(staking_txid, |record| {
            record.transition_unbonding_signatures(validator_sig, jury_sig)
        })
        .await
    }

    async fn set_unbonding_confirmed_on_btc(
        &self,
        staking_txid: &Txid,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()> {
        self.with_record(staking_txid, |record| {
            record.transition_unbonding_confirmed(block_hash, block_height)
        })
        .await
    }

    async fn set_spent_on_btc(&self, staking_txid: &Txid) -> DbResult<()> {
        self.with_record(staking_txid, |record| record.transition_spent())
            .await
    }
}
