//! SQLite implementation of the transaction store.

use async_trait::async_trait;
use bitcoin::{secp256k1::schnorr, BlockHash, Transaction, Txid};
use futures::TryStreamExt;
use sqlx::{Row, SqlitePool};
use staker_primitives::{ProofOfPossession, StakingScriptData};
use tracing::warn;

use super::config::DbConfig;
use crate::{
    errors::{DbError, DbResult, StorageError},
    tracker::{ScanReset, ScanVisitor, TransactionTracker},
    types::{
        StoredTransactionQuery, StoredTransactionQueryResult, TrackedTransaction, TxState,
        WatchedData, RECORD_VERSION,
    },
};

/// SQLite-backed [`TransactionTracker`].
///
/// Records are stored as version-tagged bincode blobs; the state tag is
/// mirrored in its own column so pages can be inspected without decoding.
#[derive(Debug, Clone)]
pub struct SqliteTracker {
    pool: SqlitePool,
    config: DbConfig,
}

impl SqliteTracker {
    /// Initializes the tracker, creating the `transactions` table if needed.
    pub async fn new(pool: SqlitePool, config: DbConfig) -> DbResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                staking_txid TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state INTEGER NOT NULL,
                record BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(StorageError::from)?;

        Ok(SqliteTracker { pool, config })
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn encode_record(record: &TrackedTransaction) -> DbResult<Vec<u8>> {
        Ok(bincode::serialize(record).map_err(StorageError::from)?)
    }

    fn decode_record(version: i64, state_tag: i64, blob: &[u8]) -> DbResult<TrackedTransaction> {
        if version != RECORD_VERSION as i64 {
            return Err(DbError::UnsupportedVersion(version as u8));
        }
        // an unknown tag means the database was written by something newer
        TxState::from_tag(state_tag as u8)?;

        Ok(bincode::deserialize(blob).map_err(StorageError::from)?)
    }

    async fn insert(&self, record: TrackedTransaction) -> DbResult<()> {
        let txid = record.staking_txid();
        execute_with_retries(&self.config, || async {
            let blob = Self::encode_record(&record)?;
            let result = sqlx::query(
                r#"
                INSERT INTO transactions (staking_txid, version, state, record)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(txid.to_string())
            .bind(RECORD_VERSION as i64)
            .bind(record.state.tag() as i64)
            .bind(blob)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    Err(DbError::DuplicateKey(txid))
                }
                Err(e) => Err(StorageError::from(e).into()),
            }
        })
        .await
    }

    /// Loads a record, applies `mutate`, and writes it back inside a single
    /// transaction. Serializes writers through SQLite's locking.
    async fn with_record<F>(&self, staking_txid: &Txid, mutate: F) -> DbResult<()>
    where
        F: Fn(&mut TrackedTransaction) -> DbResult<()> + Send + Sync,
    {
        execute_with_retries(&self.config, || async {
            let mut txn = self.pool.begin().await.map_err(StorageError::from)?;

            let row = sqlx::query(
                r#"SELECT version, state, record FROM transactions WHERE staking_txid = ?"#,
            )
            .bind(staking_txid.to_string())
            .fetch_optional(&mut *txn)
            .await
            .map_err(StorageError::from)?
            .ok_or(DbError::NotFound(*staking_txid))?;

            let version: i64 = row.try_get("version").map_err(StorageError::from)?;
            let state: i64 = row.try_get("state").map_err(StorageError::from)?;
            let blob: Vec<u8> = row.try_get("record").map_err(StorageError::from)?;

            let mut record = Self::decode_record(version, state, &blob)?;
            mutate(&mut record)?;

            sqlx::query(
                r#"UPDATE transactions SET state = ?, record = ? WHERE staking_txid = ?"#,
            )
            .bind(record.state.tag() as i64)
            .bind(Self::encode_record(&record)?)
            .bind(staking_txid.to_string())
            .execute(&mut *txn)
            .await
            .map_err(StorageError::from)?;

            txn.commit().await.map_err(StorageError::from)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TransactionTracker for SqliteTracker {
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
        execute_with_retries(&self.config, || async {
            let row = sqlx::query(
                r#"SELECT version, state, record FROM transactions WHERE staking_txid = ?"#,
            )
            .bind(staking_txid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or(DbError::NotFound(*staking_txid))?;

            let version: i64 = row.try_get("version").map_err(StorageError::from)?;
            let state: i64 = row.try_get("state").map_err(StorageError::from)?;
            let blob: Vec<u8> = row.try_get("record").map_err(StorageError::from)?;

            Self::decode_record(version, state, &blob)
        })
        .await
    }

    async fn scan_tracked_transactions(
        &self,
        visit: ScanVisitor<'_>,
        reset: ScanReset<'_>,
    ) -> DbResult<()> {
        let mut retries = 0;
        'attempt: loop {
            reset();

            let mut rows =
                sqlx::query(r#"SELECT version, state, record FROM transactions ORDER BY rowid"#)
                    .fetch(&self.pool);

            loop {
                let row = match rows.try_next().await {
                    Ok(Some(row)) => row,
                    Ok(None) => return Ok(()),
                    Err(e) if retries < self.config.max_retry_count() => {
                        warn!(err = %e, %retries, "scan interrupted, restarting");
                        retries += 1;
                        tokio::time::sleep(self.config.backoff_period()).await;
                        continue 'attempt;
                    }
                    Err(e) => return Err(StorageError::from(e).into()),
                };

                let version: i64 = row.try_get("version").map_err(StorageError::from)?;
                let state: i64 = row.try_get("state").map_err(StorageError::from)?;
                let blob: Vec<u8> = row.try_get("record").map_err(StorageError::from)?;

                let record = Self::decode_record(version, state, &blob)?;
                visit(&record)?;
            }
        }
    }

    async fn query_stored_transactions(
        &self,
        query: StoredTransactionQuery,
    ) -> DbResult<StoredTransactionQueryResult> {
        execute_with_retries(&self.config, || async {
            let order = if query.reversed { "DESC" } else { "ASC" };

            if let Some(height) = query.withdrawable_at_height {
                // the filter needs decoded records, so page in memory
                let rows = sqlx::query(&format!(
                    "SELECT version, state, record FROM transactions ORDER BY rowid {order}"
                ))
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?;

                let mut matching = Vec::new();
                for row in rows {
                    let version: i64 = row.try_get("version").map_err(StorageError::from)?;
                    let state: i64 = row.try_get("state").map_err(StorageError::from)?;
                    let blob: Vec<u8> = row.try_get("record").map_err(StorageError::from)?;

                    let record = Self::decode_record(version, state, &blob)?;
                    if record.is_withdrawable_at(height) {
                        matching.push(record);
                    }
                }

                let total = matching.len() as u64;
                let transactions = matching
                    .into_iter()
                    .skip(query.index_offset as usize)
                    .take(query.num_max_transactions as usize)
                    .collect();

                return Ok(StoredTransactionQueryResult {
                    transactions,
                    total,
                });
            }

            let total: i64 = sqlx::query(r#"SELECT COUNT(*) AS cnt FROM transactions"#)
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::from)?
                .try_get("cnt")
                .map_err(StorageError::from)?;

            let rows = sqlx::query(&format!(
                "SELECT version, state, record FROM transactions \
                 ORDER BY rowid {order} LIMIT ? OFFSET ?"
            ))
            .bind(query.num_max_transactions as i64)
            .bind(query.index_offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

            let mut transactions = Vec::with_capacity(rows.len());
            for row in rows {
                let version: i64 = row.try_get("version").map_err(StorageError::from)?;
                let state: i64 = row.try_get("state").map_err(StorageError::from)?;
                let blob: Vec<u8> = row.try_get("record").map_err(StorageError::from)?;
                transactions.push(Self::decode_record(version, state, &blob)?);
            }

            Ok(StoredTransactionQueryResult {
                transactions,
                total: total as u64,
            })
        })
        .await
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
            record.transition_unbonding_started(unbonding_tx.clone(), script_data)
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

/// Runs `operation`, retrying driver-level failures (e.g. a locked database)
/// with a backoff. Domain errors are returned immediately.
async fn execute_with_retries<F, Fut, Res>(config: &DbConfig, mut operation: F) -> DbResult<Res>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = DbResult<Res>>,
{
    let mut retries = 0;
    loop {
        match operation().await {
            Ok(res) => return Ok(res),
            Err(err) if err.is_retryable() && retries < config.max_retry_count() => {
                warn!(%err, %retries, "store operation failed, retrying");
                retries += 1;
                tokio::time::sleep(config.backoff_period()).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::SqlitePool;

    use super::*;
    use crate::test_utils::{block_hash, pop, script_data, signature, staking_tx};

    async fn tracker() -> SqliteTracker {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("must be able to open an in-memory database");
        SqliteTracker::new(pool, DbConfig::default())
            .await
            .expect("must be able to initialize the tracker")
    }

    async fn add_owned(tracker: &SqliteTracker, salt: u32) -> Txid {
        let tx = staking_tx(salt, 100_000);
        let txid = tx.compute_txid();
        tracker
            .add_transaction(
                tx,
                0,
                script_data(1_000),
                pop(),
                "bcrt1qtest".to_string(),
            )
            .await
            .unwrap();
        txid
    }

    #[tokio::test]
    async fn add_and_get_round_trip() {
        let tracker = tracker().await;
        let txid = add_owned(&tracker, 0).await;

        let record = tracker.get_transaction(&txid).await.unwrap();
        assert_eq!(record.state, TxState::SentToBtc);
        assert_eq!(record.staking_txid(), txid);
        assert!(!record.is_watched());
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let tracker = tracker().await;
        let _ = add_owned(&tracker, 0).await;

        let err = tracker
            .add_transaction(
                staking_tx(0, 100_000),
                0,
                script_data(1_000),
                pop(),
                "bcrt1qtest".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let tracker = tracker().await;
        let txid = add_owned(&tracker, 0).await;

        tracker.set_confirmed(&txid, block_hash(1), 100).await.unwrap();
        tracker.set_sent_to_coordinator(&txid).await.unwrap();
        tracker
            .set_unbonding_started(&txid, staking_tx(99, 99_000), script_data(100))
            .await
            .unwrap();
        tracker
            .set_unbonding_signatures_received(&txid, signature(), signature())
            .await
            .unwrap();
        tracker
            .set_unbonding_confirmed_on_btc(&txid, block_hash(2), 200)
            .await
            .unwrap();
        tracker.set_spent_on_btc(&txid).await.unwrap();

        let record = tracker.get_transaction(&txid).await.unwrap();
        assert_eq!(record.state, TxState::SpentOnBtc);
        let unbonding = record.unbonding.unwrap();
        assert!(unbonding.validator_sig.is_some());
        assert!(unbonding.jury_sig.is_some());
        assert_eq!(unbonding.btc_inclusion.unwrap().block_height, 200);
    }

    #[tokio::test]
    async fn illegal_edges_are_rejected() {
        let tracker = tracker().await;
        let txid = add_owned(&tracker, 0).await;

        // cannot jump straight to the coordinator
        assert!(matches!(
            tracker.set_sent_to_coordinator(&txid).await.unwrap_err(),
            DbError::InvalidStateTransition { .. }
        ));

        tracker.set_confirmed(&txid, block_hash(1), 100).await.unwrap();

        // a second confirmation is not a legal edge
        assert!(matches!(
            tracker.set_confirmed(&txid, block_hash(1), 100).await.unwrap_err(),
            DbError::InvalidStateTransition { .. }
        ));

        // spending is only legal from SentToCoordinator or
        // UnbondingConfirmedOnBtc
        assert!(matches!(
            tracker.set_spent_on_btc(&txid).await.unwrap_err(),
            DbError::InvalidStateTransition { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let tracker = tracker().await;
        let missing = staking_tx(42, 1).compute_txid();
        assert!(matches!(
            tracker.get_transaction(&missing).await.unwrap_err(),
            DbError::NotFound(_)
        ));
        assert!(matches!(
            tracker.set_confirmed(&missing, block_hash(1), 1).await.unwrap_err(),
            DbError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn scan_visits_every_record_in_order() {
        let tracker = tracker().await;
        let a = add_owned(&tracker, 0).await;
        let b = add_owned(&tracker, 1).await;

        let seen = std::sync::Mutex::new(Vec::new());
        tracker
            .scan_tracked_transactions(
                &mut |record| {
                    seen.lock().unwrap().push(record.staking_txid());
                    Ok(())
                },
                &mut || seen.lock().unwrap().clear(),
            )
            .await
            .unwrap();

        assert_eq!(seen.into_inner().unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn pagination_and_reversal() {
        let tracker = tracker().await;
        let ids: Vec<Txid> = {
            let mut ids = Vec::new();
            for salt in 0..5 {
                ids.push(add_owned(&tracker, salt).await);
            }
            ids
        };

        let page = tracker
            .query_stored_transactions(StoredTransactionQuery {
                index_offset: 1,
                num_max_transactions: 2,
                reversed: false,
                withdrawable_at_height: None,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let page_ids: Vec<Txid> = page.transactions.iter().map(|t| t.staking_txid()).collect();
        assert_eq!(page_ids, vec![ids[1], ids[2]]);

        let reversed = tracker
            .query_stored_transactions(StoredTransactionQuery {
                index_offset: 0,
                num_max_transactions: 1,
                reversed: true,
                withdrawable_at_height: None,
            })
            .await
            .unwrap();
        assert_eq!(reversed.transactions[0].staking_txid(), ids[4]);
    }

    #[tokio::test]
    async fn withdrawable_filter_checks_timelock_expiry() {
        let tracker = tracker().await;
        let txid = add_owned(&tracker, 0).await;
        tracker.set_confirmed(&txid, block_hash(1), 100).await.unwrap();
        tracker.set_sent_to_coordinator(&txid).await.unwrap();

        // lock_time is 1000 and inclusion height 100: spendable from 1100 on
        let not_yet = tracker
            .query_stored_transactions(
                StoredTransactionQuery {
                    index_offset: 0,
                    num_max_transactions: 10,
                    reversed: false,
                    withdrawable_at_height: None,
                }
                .withdrawable_at(1_099),
            )
            .await
            .unwrap();
        assert!(not_yet.transactions.is_empty());

        let ready = tracker
            .query_stored_transactions(
                StoredTransactionQuery {
                    index_offset: 0,
                    num_max_transactions: 10,
                    reversed: false,
                    withdrawable_at_height: None,
                }
                .withdrawable_at(1_100),
            )
            .await
            .unwrap();
        assert_eq!(ready.transactions.len(), 1);
    }
}
