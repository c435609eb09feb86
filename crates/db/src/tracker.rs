//! The store trait consumed by the lifecycle engine.

use async_trait::async_trait;
use bitcoin::{secp256k1::schnorr, BlockHash, Transaction, Txid};
use staker_primitives::{ProofOfPossession, StakingScriptData};

use crate::{
    errors::DbResult,
    types::{StoredTransactionQuery, StoredTransactionQueryResult, TrackedTransaction, WatchedData},
};

/// Visitor invoked for every record during a scan.
pub type ScanVisitor<'a> = &'a mut (dyn FnMut(&TrackedTransaction) -> DbResult<()> + Send);

/// Hook invoked when a scan restarts from the beginning (e.g. after a busy
/// retry); visitors must drop any partial results they collected.
pub type ScanReset<'a> = &'a mut (dyn FnMut() + Send);

/// Persistent store of tracked staking transactions, keyed by staking txid.
///
/// All state transitions are durable before the method returns, and each
/// validates the record's current state, failing with
/// [`crate::DbError::InvalidStateTransition`] on an illegal edge.
#[async_trait]
pub trait TransactionTracker: Send + Sync {
    /// Inserts an owned transaction in state `SentToBtc`.
    async fn add_transaction(
        &self,
        staking_tx: Transaction,
        staking_output_index: u32,
        script_data: StakingScriptData,
        pop: ProofOfPossession,
        staker_address: String,
    ) -> DbResult<()>;

    /// Inserts a watched transaction in state `SentToBtc`.
    async fn add_watched_transaction(
        &self,
        staking_tx: Transaction,
        staking_output_index: u32,
        script_data: StakingScriptData,
        pop: ProofOfPossession,
        staker_address: String,
        watched: WatchedData,
    ) -> DbResult<()>;

    /// Fetches the record for a staking txid.
    async fn get_transaction(&self, staking_txid: &Txid) -> DbResult<TrackedTransaction>;

    /// Read-only traversal over all records. Holds no write transaction, so
    /// it can run concurrently with writers; `reset` fires if the traversal
    /// restarts.
    async fn scan_tracked_transactions(
        &self,
        visit: ScanVisitor<'_>,
        reset: ScanReset<'_>,
    ) -> DbResult<()>;

    /// Bounded paginated query for read APIs.
    async fn query_stored_transactions(
        &self,
        query: StoredTransactionQuery,
    ) -> DbResult<StoredTransactionQueryResult>;

    /// `SentToBtc -> ConfirmedOnBtc`.
    async fn set_confirmed(
        &self,
        staking_txid: &Txid,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()>;

    /// `ConfirmedOnBtc -> SentToCoordinator`.
    async fn set_sent_to_coordinator(&self, staking_txid: &Txid) -> DbResult<()>;

    /// `SentToCoordinator -> UnbondingStarted`.
    async fn set_unbonding_started(
        &self,
        staking_txid: &Txid,
        unbonding_tx: Transaction,
        script_data: StakingScriptData,
    ) -> DbResult<()>;

    /// `UnbondingStarted -> UnbondingSignaturesReceived`.
    async fn set_unbonding_signatures_received(
        &self,
        staking_txid: &Txid,
        validator_sig: schnorr::Signature,
        jury_sig: schnorr::Signature,
    ) -> DbResult<()>;

    /// `UnbondingSignaturesReceived -> UnbondingConfirmedOnBtc`.
    async fn set_unbonding_confirmed_on_btc(
        &self,
        staking_txid: &Txid,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()>;

    /// `SentToCoordinator | UnbondingConfirmedOnBtc -> SpentOnBtc`.
    async fn set_spent_on_btc(&self, staking_txid: &Txid) -> DbResult<()>;
}
