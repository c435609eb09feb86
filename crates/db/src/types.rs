//! Record types for tracked staking transactions.

use std::fmt;

use bitcoin::{secp256k1::schnorr, secp256k1::PublicKey, BlockHash, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use staker_primitives::{BlockRef, ProofOfPossession, StakingScriptData};

use crate::errors::{DbError, DbResult};

/// Version tag written in front of every persisted record.
pub const RECORD_VERSION: u8 = 1;

/// Lifecycle state of a tracked staking transaction.
///
/// States advance strictly forward:
/// `SentToBtc -> ConfirmedOnBtc -> SentToCoordinator`, then either straight
/// to `SpentOnBtc` (timelock expiry) or through the unbonding chain
/// `UnbondingStarted -> UnbondingSignaturesReceived ->
/// UnbondingConfirmedOnBtc -> SpentOnBtc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    /// Broadcast (or externally observed) on Bitcoin, awaiting confirmations.
    SentToBtc,

    /// Deep enough in the Bitcoin chain to be registered as a delegation.
    ConfirmedOnBtc,

    /// Registered as a delegation on the coordinator chain.
    SentToCoordinator,

    /// Undelegation registered; waiting for jury and validator signatures.
    UnbondingStarted,

    /// All unbonding co-signatures collected.
    UnbondingSignaturesReceived,

    /// The unbonding transaction is confirmed on Bitcoin.
    UnbondingConfirmedOnBtc,

    /// The stake (or unbonded stake) has been spent back to the staker.
    SpentOnBtc,
}

impl TxState {
    /// Stable numeric tag persisted in the database.
    pub fn tag(&self) -> u8 {
        match self {
            TxState::SentToBtc => 1,
            TxState::ConfirmedOnBtc => 2,
            TxState::SentToCoordinator => 3,
            TxState::UnbondingStarted => 4,
            TxState::UnbondingSignaturesReceived => 5,
            TxState::UnbondingConfirmedOnBtc => 6,
            TxState::SpentOnBtc => 7,
        }
    }

    /// Inverse of [`TxState::tag`]. Unknown tags are a fatal data error.
    pub fn from_tag(tag: u8) -> DbResult<Self> {
        match tag {
            1 => Ok(TxState::SentToBtc),
            2 => Ok(TxState::ConfirmedOnBtc),
            3 => Ok(TxState::SentToCoordinator),
            4 => Ok(TxState::UnbondingStarted),
            5 => Ok(TxState::UnbondingSignaturesReceived),
            6 => Ok(TxState::UnbondingConfirmedOnBtc),
            7 => Ok(TxState::SpentOnBtc),
            other => Err(DbError::UnknownStateTag(other)),
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::SentToBtc => "SENT_TO_BTC",
            TxState::ConfirmedOnBtc => "CONFIRMED_ON_BTC",
            TxState::SentToCoordinator => "SENT_TO_COORDINATOR",
            TxState::UnbondingStarted => "UNBONDING_STARTED",
            TxState::UnbondingSignaturesReceived => "UNBONDING_SIGNATURES_RECEIVED",
            TxState::UnbondingConfirmedOnBtc => "UNBONDING_CONFIRMED_ON_BTC",
            TxState::SpentOnBtc => "SPENT_ON_BTC",
        };
        f.write_str(s)
    }
}

/// Data held only for watched (externally built and broadcast) transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedData {
    /// Externally supplied pre-signed slashing transaction.
    pub slashing_tx: Transaction,

    /// Externally supplied staker signature on the slashing transaction.
    pub staker_slashing_sig: schnorr::Signature,

    /// The staker's coordinator-chain public key.
    pub staker_coordinator_pk: PublicKey,
}

/// Unbonding sub-record, present from `UnbondingStarted` onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingStoreData {
    /// The unbonding transaction registered with the coordinator.
    pub unbonding_tx: Transaction,

    /// Script commitment of the unbonding output.
    pub script_data: StakingScriptData,

    /// Validator co-signature, once collected.
    pub validator_sig: Option<schnorr::Signature>,

    /// Jury co-signature, once collected.
    pub jury_sig: Option<schnorr::Signature>,

    /// Bitcoin inclusion of the unbonding transaction, once confirmed.
    pub btc_inclusion: Option<BlockRef>,
}

/// A tracked staking transaction and everything known about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    /// The full staking transaction.
    pub staking_tx: Transaction,

    /// Index of the staked output within `staking_tx`.
    pub staking_output_index: u32,

    /// Script commitment of the staked output.
    pub script_data: StakingScriptData,

    /// Network-qualified staker address.
    pub staker_address: String,

    /// Proof of possession submitted with the delegation.
    pub pop: ProofOfPossession,

    /// Present iff the transaction is watched rather than owned.
    pub watched: Option<WatchedData>,

    /// Current lifecycle state.
    pub state: TxState,

    /// Bitcoin inclusion of the staking transaction, once confirmed.
    pub btc_inclusion: Option<BlockRef>,

    /// Unbonding sub-record, populated from `UnbondingStarted` onward.
    pub unbonding: Option<UnbondingStoreData>,
}

impl TrackedTransaction {
    /// The staking txid keying this record.
    pub fn staking_txid(&self) -> Txid {
        self.staking_tx.compute_txid()
    }

    /// Whether the transaction is watched (externally built and broadcast).
    pub fn is_watched(&self) -> bool {
        self.watched.is_some()
    }

    /// The staked output.
    pub fn staking_output(&self) -> &TxOut {
        &self.staking_tx.output[self.staking_output_index as usize]
    }

    fn expect_state(&self, from: TxState, to: TxState) -> DbResult<()> {
        if self.state != from {
            return Err(DbError::InvalidStateTransition {
                txid: self.staking_txid(),
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    /// `SentToBtc -> ConfirmedOnBtc`.
    pub(crate) fn transition_confirmed(
        &mut self,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()> {
        self.expect_state(TxState::SentToBtc, TxState::ConfirmedOnBtc)?;
        self.state = TxState::ConfirmedOnBtc;
        self.btc_inclusion = Some(BlockRef {
            block_hash,
            block_height,
        });
        Ok(())
    }

    /// `ConfirmedOnBtc -> SentToCoordinator`.
    pub(crate) fn transition_sent_to_coordinator(&mut self) -> DbResult<()> {
        self.expect_state(TxState::ConfirmedOnBtc, TxState::SentToCoordinator)?;
        self.state = TxState::SentToCoordinator;
        Ok(())
    }

    /// `SentToCoordinator -> UnbondingStarted`.
    pub(crate) fn transition_unbonding_started(
        &mut self,
        unbonding_tx: Transaction,
        script_data: StakingScriptData,
    ) -> DbResult<()> {
        self.expect_state(TxState::SentToCoordinator, TxState::UnbondingStarted)?;
        self.state = TxState::UnbondingStarted;
        self.unbonding = Some(UnbondingStoreData {
            unbonding_tx,
            script_data,
            validator_sig: None,
            jury_sig: None,
            btc_inclusion: None,
        });
        Ok(())
    }

    /// `UnbondingStarted -> UnbondingSignaturesReceived`.
    pub(crate) fn transition_unbonding_signatures(
        &mut self,
        validator_sig: schnorr::Signature,
        jury_sig: schnorr::Signature,
    ) -> DbResult<()> {
        self.expect_state(
            TxState::UnbondingStarted,
            TxState::UnbondingSignaturesReceived,
        )?;
        let txid = self.staking_txid();
        let unbonding = self.unbonding.as_mut().ok_or(DbError::InvalidStateTransition {
            txid,
            from: TxState::UnbondingStarted,
            to: TxState::UnbondingSignaturesReceived,
        })?;
        unbonding.validator_sig = Some(validator_sig);
        unbonding.jury_sig = Some(jury_sig);
        self.state = TxState::UnbondingSignaturesReceived;
        Ok(())
    }

    /// `UnbondingSignaturesReceived -> UnbondingConfirmedOnBtc`.
    pub(crate) fn transition_unbonding_confirmed(
        &mut self,
        block_hash: BlockHash,
        block_height: u32,
    ) -> DbResult<()> {
        self.expect_state(
            TxState::UnbondingSignaturesReceived,
            TxState::UnbondingConfirmedOnBtc,
        )?;
        let txid = self.staking_txid();
        let unbonding = self.unbonding.as_mut().ok_or(DbError::InvalidStateTransition {
            txid,
            from: TxState::UnbondingSignaturesReceived,
            to: TxState::UnbondingConfirmedOnBtc,
        })?;
        unbonding.btc_inclusion = Some(BlockRef {
            block_hash,
            block_height,
        });
        self.state = TxState::UnbondingConfirmedOnBtc;
        Ok(())
    }

    /// `SentToCoordinator | UnbondingConfirmedOnBtc -> SpentOnBtc`.
    pub(crate) fn transition_spent(&mut self) -> DbResult<()> {
        match self.state {
            TxState::SentToCoordinator | TxState::UnbondingConfirmedOnBtc => {
                self.state = TxState::SpentOnBtc;
                Ok(())
            }
            from => Err(DbError::InvalidStateTransition {
                txid: self.staking_txid(),
                from,
                to: TxState::SpentOnBtc,
            }),
        }
    }

    /// Whether the stake can be spent back to the staker at `height`: either
    /// the staking timelock has expired while still delegated, or the
    /// unbonding output has confirmed and its (shorter) timelock has expired.
    pub fn is_withdrawable_at(&self, height: u32) -> bool {
        match self.state {
            TxState::SentToCoordinator => self
                .btc_inclusion
                .map(|inc| inc.block_height + self.script_data.lock_time as u32 <= height)
                .unwrap_or(false),
            TxState::UnbondingConfirmedOnBtc => self
                .unbonding
                .as_ref()
                .and_then(|u| {
                    u.btc_inclusion
                        .map(|inc| inc.block_height + u.script_data.lock_time as u32 <= height)
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Parameters of a paginated read query.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredTransactionQuery {
    /// Number of records to skip.
    pub index_offset: u64,

    /// Maximum number of records to return.
    pub num_max_transactions: u64,

    /// Return records in reverse insertion order.
    pub reversed: bool,

    /// When set, only records whose stake is spendable at this height.
    pub withdrawable_at_height: Option<u32>,
}

impl StoredTransactionQuery {
    /// Restricts the query to records withdrawable at `height`.
    pub fn withdrawable_at(self, height: u32) -> Self {
        Self {
            withdrawable_at_height: Some(height),
            ..self
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct StoredTransactionQueryResult {
    /// Records in this page.
    pub transactions: Vec<TrackedTransaction>,

    /// Total number of records matching the query.
    pub total: u64,
}
