//! Startup reconciliation of persisted state against both chains.
//!
//! For each record, determine where the delegation sits relative to Bitcoin
//! and the coordinator and resume the minimum work needed to re-enter the
//! steady loop. The scan only collects work; all actions run afterwards so no
//! read traversal ever overlaps a write.

use std::sync::{Arc, Mutex};

use bitcoin::Txid;
use staker_btc_notify::ConfirmationRequest;
use staker_coordinator::{CoordinatorError, CoordinatorParams};
use staker_db::{DbResult, TrackedTransaction, TxState};
use staker_wallet::TxStatus;
use tracing::{debug, error, info};

use crate::{
    app::Inner,
    errors::EngineError,
    events::{DelegationSendRequest, DelegationSendResult, StakingTxConfirmation, UnbondingStartedAck},
    util::push_or_quit,
    UNBONDING_TX_CONFIRMATIONS,
};

#[derive(Default)]
struct ScanWork {
    sent_to_btc: Vec<Txid>,
    confirmed_on_btc: Vec<Txid>,
    on_coordinator: Vec<(Txid, TxState)>,
}

/// Classifies every persisted record and resumes its lifecycle.
///
/// Communication failures with the wallet or the coordinator abort startup;
/// per-record inconsistencies are logged and skipped, never regressing state.
pub(crate) async fn check_transactions_status(inner: &Arc<Inner>) -> Result<(), EngineError> {
    let params = inner.coordinator.params().await?;

    let work = Mutex::new(ScanWork::default());
    {
        let mut visit = |record: &TrackedTransaction| -> DbResult<()> {
            let mut work = work.lock().expect("scan work mutex must not be poisoned");
            let staking_txid = record.staking_txid();
            match record.state {
                TxState::SentToBtc => work.sent_to_btc.push(staking_txid),
                TxState::ConfirmedOnBtc => work.confirmed_on_btc.push(staking_txid),
                // anything registered with the coordinator may have in-flight
                // unbonding work to resume
                TxState::SentToCoordinator
                | TxState::UnbondingStarted
                | TxState::UnbondingSignaturesReceived => {
                    work.on_coordinator.push((staking_txid, record.state))
                }
                TxState::UnbondingConfirmedOnBtc | TxState::SpentOnBtc => {}
            }
            Ok(())
        };
        let mut reset = || {
            *work.lock().expect("scan work mutex must not be poisoned") = ScanWork::default();
        };
        inner
            .tracker
            .scan_tracked_transactions(&mut visit, &mut reset)
            .await?;
    }
    let work = work
        .into_inner()
        .expect("scan work mutex must not be poisoned");

    info!(
        sent_to_btc = work.sent_to_btc.len(),
        confirmed_on_btc = work.confirmed_on_btc.len(),
        on_coordinator = work.on_coordinator.len(),
        "reconciling tracked transactions"
    );

    for staking_txid in work.sent_to_btc {
        resume_sent_to_btc(inner, staking_txid, &params).await?;
    }

    for staking_txid in work.confirmed_on_btc {
        resume_confirmed_on_btc(inner, staking_txid).await?;
    }

    for (staking_txid, state) in work.on_coordinator {
        match state {
            TxState::SentToCoordinator => resume_sent_to_coordinator(inner, staking_txid).await?,
            TxState::UnbondingStarted => {
                debug!(%staking_txid, "restarting unbonding signature polling");
                let task_inner = inner.clone();
                inner.spawn_tracked(async move {
                    task_inner.poll_unbonding_signatures(staking_txid).await;
                });
            }
            TxState::UnbondingSignaturesReceived => {
                resume_unbonding_broadcast(inner, staking_txid).await?;
            }
            state => {
                return Err(EngineError::Fatal(format!(
                    "unexpected local transaction state during reconciliation: {state}"
                )))
            }
        }
    }

    Ok(())
}

/// A record that never saw its confirmation: re-check the chain and either
/// synthesize the confirmation event or re-register the watch.
async fn resume_sent_to_btc(
    inner: &Arc<Inner>,
    staking_txid: Txid,
    params: &CoordinatorParams,
) -> Result<(), EngineError> {
    let record = inner.tracker.get_transaction(&staking_txid).await?;
    let script_pubkey = record.staking_output().script_pubkey.clone();
    let required_depth = params.confirmation_depth as u32;
    let best_block_height = inner.best_height();

    let status = inner.wallet.tx_details(&staking_txid, &script_pubkey).await?;

    match status {
        TxStatus::NotFound => {
            // most likely the tx left the mempool and the wallet is not
            // synced far enough to see it; the operator has to investigate
            error!(
                %staking_txid,
                "transaction from database not found in btc mempool or chain"
            );
        }
        TxStatus::InMempool => {
            debug!(%staking_txid, "transaction found in mempool, waiting for confirmation");
            Inner::wait_for_staking_tx_confirmation(
                inner,
                staking_txid,
                script_pubkey,
                required_depth,
                best_block_height,
            )
            .await?;
        }
        TxStatus::InChain(info) => {
            if best_block_height < info.block_height {
                // the wallet reported a tx above our best height; a lagging
                // view we cannot act on
                error!(
                    %staking_txid,
                    tx_block_height = %info.block_height,
                    %best_block_height,
                    "current best block height is lower than the transaction's block height"
                );
                return Ok(());
            }

            let depth = best_block_height - info.block_height;
            if depth >= required_depth {
                debug!(%staking_txid, %depth, "transaction already deep enough, resuming delegation");
                let _ = push_or_quit(
                    &inner.channels.btc_confirmed,
                    StakingTxConfirmation {
                        staking_txid,
                        tx_index: info.tx_index,
                        block_hash: info.block_hash,
                        block_height: info.block_height,
                        inclusion_block: Some(info.block),
                    },
                    &inner.quit,
                )
                .await;
            } else {
                debug!(%staking_txid, %depth, "transaction not deep enough, waiting for confirmation");
                Inner::wait_for_staking_tx_confirmation(
                    inner,
                    staking_txid,
                    script_pubkey,
                    required_depth,
                    info.block_height,
                )
                .await?;
            }
        }
    }

    Ok(())
}

/// A record confirmed on Bitcoin whose delegation may or may not have reached
/// the coordinator before the crash.
async fn resume_confirmed_on_btc(inner: &Arc<Inner>, staking_txid: Txid) -> Result<(), EngineError> {
    if inner
        .coordinator
        .is_tx_already_part_of_delegation(&staking_txid)
        .await?
    {
        debug!(
            %staking_txid,
            "confirmed transaction already delegated on the coordinator, fixing db state"
        );
        let _ = push_or_quit(
            &inner.channels.delegation_done,
            DelegationSendResult {
                staking_txid,
                result: Ok(()),
            },
            &inner.quit,
        )
        .await;
        return Ok(());
    }

    let record = inner.tracker.get_transaction(&staking_txid).await?;
    let status = inner
        .wallet
        .tx_details(&staking_txid, &record.staking_output().script_pubkey)
        .await?;

    match status {
        TxStatus::InChain(info) => {
            debug!(
                %staking_txid,
                block_height = %info.block_height,
                "confirmed transaction not yet delegated, resubmitting"
            );
            let _ = push_or_quit(
                &inner.channels.delegation_send,
                DelegationSendRequest {
                    staking_txid,
                    tx_index: info.tx_index,
                    inclusion_block: info.block,
                },
                &inner.quit,
            )
            .await;
        }
        _ => {
            // the btc node we are connected to most probably lost data
            error!(
                %staking_txid,
                "already confirmed transaction not found on btc chain"
            );
        }
    }

    Ok(())
}

/// A delegated record: probe whether an undelegation was registered right
/// before a crash and resume it locally if so.
async fn resume_sent_to_coordinator(
    inner: &Arc<Inner>,
    staking_txid: Txid,
) -> Result<(), EngineError> {
    let details = match inner.coordinator.query_delegation_info(&staking_txid).await {
        Ok(details) => details,
        Err(CoordinatorError::DelegationNotFound(_)) => {
            // coordinator node may lag behind; nothing safe to do locally
            error!(
                %staking_txid,
                "delegation not found on the coordinator, but found in the local db"
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(undelegation) = details.undelegation else {
        // local and coordinator state agree
        return Ok(());
    };

    debug!(
        %staking_txid,
        "undelegation registered on the coordinator but missing locally, resuming unbonding"
    );

    let _ = push_or_quit(
        &inner.channels.unbonding_ack,
        UnbondingStartedAck {
            staking_txid,
            unbonding_tx: undelegation.unbonding_tx,
            script_data: undelegation.script_data,
            reply: None,
        },
        &inner.quit,
    )
    .await;

    Ok(())
}

/// All co-signatures collected: make sure the unbonding tx lands on Bitcoin
/// and is watched to depth.
async fn resume_unbonding_broadcast(
    inner: &Arc<Inner>,
    staking_txid: Txid,
) -> Result<(), EngineError> {
    let record = inner.tracker.get_transaction(&staking_txid).await?;
    let Some(unbonding) = record.unbonding.clone() else {
        return Err(EngineError::Fatal(format!(
            "record {staking_txid} in UnbondingSignaturesReceived without unbonding data"
        )));
    };

    let unbonding_txid = unbonding.unbonding_tx.compute_txid();
    let unbonding_script = unbonding.unbonding_tx.output[0].script_pubkey.clone();

    let status = inner
        .wallet
        .tx_details(&unbonding_txid, &unbonding_script)
        .await
        .map_err(|e| {
            EngineError::Fatal(format!("failed to get unbonding btc transaction details: {e}"))
        })?;

    match status {
        TxStatus::NotFound => {
            debug!(
                %staking_txid,
                %unbonding_txid,
                "unbonding transaction not found on btc chain, sending it again"
            );
            let task_inner = inner.clone();
            inner.spawn_tracked(async move {
                task_inner
                    .send_unbonding_tx_to_btc_and_wait(staking_txid, record)
                    .await;
            });
        }
        status => {
            // in the mempool we hint at the current tip, in the chain at the
            // inclusion height
            let height_hint = match &status {
                TxStatus::InChain(info) => {
                    debug!(
                        %staking_txid,
                        %unbonding_txid,
                        unbonding_tx_height = %info.block_height,
                        "unbonding transaction in btc chain, waiting for more confirmations"
                    );
                    info.block_height
                }
                _ => {
                    debug!(
                        %staking_txid,
                        %unbonding_txid,
                        "unbonding transaction in btc mempool, waiting for more confirmations"
                    );
                    inner.best_height()
                }
            };

            let event = inner
                .notifier
                .register_confirmations(ConfirmationRequest {
                    txid: unbonding_txid,
                    script_pubkey: unbonding_script,
                    num_confs: UNBONDING_TX_CONFIRMATIONS,
                    height_hint,
                    include_block: false,
                })
                .await
                .map_err(|e| {
                    EngineError::Fatal(format!(
                        "failed to register unbonding tx confirmation event: {e}"
                    ))
                })?;

            let task_inner = inner.clone();
            inner.spawn_tracked(async move {
                task_inner
                    .wait_for_unbonding_tx_confirmation(staking_txid, unbonding_txid, event)
                    .await;
            });
        }
    }

    Ok(())
}
