//! The staker application: adapters, channels, event loop and helper tasks.

use std::{
    mem,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use bitcoin::{
    secp256k1::{schnorr, Keypair, Message, PublicKey, Secp256k1},
    Address, Amount, Network, OutPoint, Transaction, TxOut, Txid, XOnlyPublicKey,
};
use staker_btc_notify::{ChainNotifier, ConfNtfn, ConfirmationEvent, ConfirmationRequest};
use staker_coordinator::{CoordinatorClient, ValidatorsResponse};
use staker_db::{
    DbError, StoredTransactionQuery, StoredTransactionQueryResult, TrackedTransaction,
    TransactionTracker, TxState, UnbondingStoreData, WatchedData,
};
use staker_primitives::{DelegationData, ProofOfPossession, StakingScriptData};
use staker_tx_builder::{
    pop::{build_proof_of_possession, pop_payload},
    proof::build_inclusion_proof,
    scripts::{script_spend_sighash, staking_script_pubkey, unbonding_path_witness, StakingPaths},
    slashing::build_slashing_tx,
    spend::build_spend_stake_tx,
    staking::{
        check_fee_rate, check_staking_amount, check_staking_time, effective_slashing_fee,
        staking_output,
    },
    unbonding::build_undelegation_data,
};
use staker_wallet::{Utxo, WalletController};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    errors::EngineError,
    events::{
        DelegationSendRequest, DelegationSendResult, SpendConfirmation, StakingRequest,
        StakingTxConfirmation, UnbondingRequest, UnbondingSignaturesEvent, UnbondingStartedAck,
        UnbondingTxConfirmation,
    },
    fee::FeeEstimator,
    util::push_or_quit,
    MAX_PENDING_DELEGATIONS, SPEND_CONFIRMATION_TIMEOUT, SPEND_STAKE_TX_CONFIRMATIONS,
    UNBONDING_SEND_RETRY_TIMEOUT, UNBONDING_SIGNATURES_POLL_INTERVAL, UNBONDING_TX_CONFIRMATIONS,
    WALLET_UNLOCK_TIMEOUT_SECS,
};

pub(crate) struct Channels {
    pub staking_request: mpsc::Sender<StakingRequest>,
    pub btc_confirmed: mpsc::Sender<StakingTxConfirmation>,
    pub delegation_send: mpsc::Sender<DelegationSendRequest>,
    pub delegation_done: mpsc::Sender<DelegationSendResult>,
    pub unbonding_request: mpsc::Sender<UnbondingRequest>,
    pub unbonding_ack: mpsc::Sender<UnbondingStartedAck>,
    pub unbonding_sigs: mpsc::Sender<UnbondingSignaturesEvent>,
    pub unbonding_confirmed: mpsc::Sender<UnbondingTxConfirmation>,
    pub spend_confirmed: mpsc::Sender<SpendConfirmation>,
}

struct Receivers {
    staking_request: mpsc::Receiver<StakingRequest>,
    btc_confirmed: mpsc::Receiver<StakingTxConfirmation>,
    delegation_send: mpsc::Receiver<DelegationSendRequest>,
    delegation_done: mpsc::Receiver<DelegationSendResult>,
    unbonding_request: mpsc::Receiver<UnbondingRequest>,
    unbonding_ack: mpsc::Receiver<UnbondingStartedAck>,
    unbonding_sigs: mpsc::Receiver<UnbondingSignaturesEvent>,
    unbonding_confirmed: mpsc::Receiver<UnbondingTxConfirmation>,
    spend_confirmed: mpsc::Receiver<SpendConfirmation>,
}

pub(crate) struct Inner {
    pub(crate) network: Network,
    pub(crate) wallet: Arc<dyn WalletController>,
    pub(crate) coordinator: Arc<dyn CoordinatorClient>,
    pub(crate) notifier: Arc<dyn ChainNotifier>,
    pub(crate) fee_estimator: Arc<dyn FeeEstimator>,
    pub(crate) tracker: Arc<dyn TransactionTracker>,

    pub(crate) quit: CancellationToken,
    pub(crate) best_block_height: AtomicU32,
    pub(crate) channels: Channels,

    started: AtomicBool,
    stopped: AtomicBool,
    receivers: Mutex<Option<Receivers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_loop: Mutex<Option<JoinHandle<Result<(), EngineError>>>>,
}

/// The staking lifecycle application.
///
/// All delegation state is mutated by a single event loop; public operations
/// enqueue requests carrying one-shot reply slots and wait for the loop (or a
/// helper task) to answer.
pub struct StakerApp {
    inner: Arc<Inner>,
}

impl StakerApp {
    /// Wires the application from its collaborators. Nothing runs until
    /// [`StakerApp::start`].
    pub fn new(
        network: Network,
        wallet: Arc<dyn WalletController>,
        coordinator: Arc<dyn CoordinatorClient>,
        notifier: Arc<dyn ChainNotifier>,
        fee_estimator: Arc<dyn FeeEstimator>,
        tracker: Arc<dyn TransactionTracker>,
    ) -> Self {
        let (staking_request_tx, staking_request_rx) = mpsc::channel(1);
        let (btc_confirmed_tx, btc_confirmed_rx) = mpsc::channel(MAX_PENDING_DELEGATIONS);
        let (delegation_send_tx, delegation_send_rx) = mpsc::channel(MAX_PENDING_DELEGATIONS);
        let (delegation_done_tx, delegation_done_rx) = mpsc::channel(1);
        let (unbonding_request_tx, unbonding_request_rx) = mpsc::channel(1);
        let (unbonding_ack_tx, unbonding_ack_rx) = mpsc::channel(1);
        let (unbonding_sigs_tx, unbonding_sigs_rx) = mpsc::channel(MAX_PENDING_DELEGATIONS);
        let (unbonding_confirmed_tx, unbonding_confirmed_rx) =
            mpsc::channel(MAX_PENDING_DELEGATIONS);
        let (spend_confirmed_tx, spend_confirmed_rx) = mpsc::channel(MAX_PENDING_DELEGATIONS);

        let inner = Inner {
            network,
            wallet,
            coordinator,
            notifier,
            fee_estimator,
            tracker,
            quit: CancellationToken::new(),
            best_block_height: AtomicU32::new(0),
            channels: Channels {
                staking_request: staking_request_tx,
                btc_confirmed: btc_confirmed_tx,
                delegation_send: delegation_send_tx,
                delegation_done: delegation_done_tx,
                unbonding_request: unbonding_request_tx,
                unbonding_ack: unbonding_ack_tx,
                unbonding_sigs: unbonding_sigs_tx,
                unbonding_confirmed: unbonding_confirmed_tx,
                spend_confirmed: spend_confirmed_tx,
            },
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            receivers: Mutex::new(Some(Receivers {
                staking_request: staking_request_rx,
                btc_confirmed: btc_confirmed_rx,
                delegation_send: delegation_send_rx,
                delegation_done: delegation_done_rx,
                unbonding_request: unbonding_request_rx,
                unbonding_ack: unbonding_ack_rx,
                unbonding_sigs: unbonding_sigs_rx,
                unbonding_confirmed: unbonding_confirmed_rx,
                spend_confirmed: spend_confirmed_rx,
            })),
            tasks: Mutex::new(Vec::new()),
            event_loop: Mutex::new(None),
        };

        StakerApp {
            inner: Arc::new(inner),
        }
    }

    /// Starts the application: establishes the tip subscription, spawns the
    /// event loop and helper tasks, then reconciles persisted state against
    /// both chains. Idempotent.
    pub async fn start(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("starting staker app");

        let mut blocks = inner.notifier.subscribe_blocks().await?;

        // the first delivered item is the current tip
        let tip = tokio::select! {
            _ = inner.quit.cancelled() => return Err(EngineError::ShuttingDown),
            block = blocks.recv() => block.ok_or(EngineError::ShuttingDown)?,
        };
        inner
            .best_block_height
            .store(tip.height, Ordering::SeqCst);
        info!(height = %tip.height, "initial btc best block height");

        let receivers = inner
            .receivers
            .lock()
            .expect("receivers mutex must not be poisoned")
            .take()
            .expect("start must only run once");

        {
            let inner = inner.clone();
            self.inner.spawn_tracked(async move {
                inner.handle_new_blocks(blocks).await;
            });
        }

        {
            let inner = inner.clone();
            let delegation_send = receivers.delegation_send;
            let unbonding_request = receivers.unbonding_request;
            self.inner.spawn_tracked(async move {
                inner
                    .handle_sent_to_coordinator(delegation_send, unbonding_request)
                    .await;
            });
        }

        let loop_handle = {
            let inner = inner.clone();
            tokio::spawn(inner.handle_staking(
                receivers.staking_request,
                receivers.btc_confirmed,
                receivers.delegation_done,
                receivers.unbonding_ack,
                receivers.unbonding_sigs,
                receivers.unbonding_confirmed,
                receivers.spend_confirmed,
            ))
        };
        *inner
            .event_loop
            .lock()
            .expect("event loop mutex must not be poisoned") = Some(loop_handle);

        // resume in-flight delegations before accepting new requests
        crate::reconciler::check_transactions_status(inner).await?;

        Ok(())
    }

    /// Stops the application and joins every helper task. Idempotent.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("stopping staker app");
        inner.quit.cancel();

        loop {
            let tasks = mem::take(
                &mut *inner.tasks.lock().expect("tasks mutex must not be poisoned"),
            );
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                let _ = task.await;
            }
        }

        let handle = inner
            .event_loop
            .lock()
            .expect("event loop mutex must not be poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Waits for the event loop to exit; an `Err` means a fatal condition
    /// terminated it and the process should die.
    pub async fn join_event_loop(&self) -> Result<(), EngineError> {
        let handle = self
            .inner
            .event_loop
            .lock()
            .expect("event loop mutex must not be poisoned")
            .take();

        match handle {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(EngineError::Fatal(format!("event loop panicked: {e}")))),
            None => {
                self.inner.quit.cancelled().await;
                Ok(())
            }
        }
    }

    /// The best Bitcoin block height observed so far.
    pub fn best_block_height(&self) -> u32 {
        self.inner.best_block_height.load(Ordering::SeqCst)
    }

    /// Builds, funds, broadcasts and tracks a new staking transaction,
    /// returning its txid once the confirmation watch is registered.
    pub async fn stake_funds(
        &self,
        staker_address: Address,
        staking_amount: Amount,
        validator_pk: XOnlyPublicKey,
        staking_time_blocks: u16,
    ) -> Result<Txid, EngineError> {
        let inner = &self.inner;
        if inner.quit.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        inner.ensure_validator_exists(&validator_pk).await?;

        let params = inner.coordinator.params().await?;
        let slashing_fee = effective_slashing_fee(params.min_slashing_fee);
        check_staking_amount(staking_amount, slashing_fee)?;
        check_staking_time(
            staking_time_blocks,
            params.finalization_timeout,
            params.confirmation_depth,
        )?;

        // no point moving forward unless the wallet controls the keys
        inner.wallet.unlock_wallet(WALLET_UNLOCK_TIMEOUT_SECS).await?;
        let keypair = inner.staker_keypair(&staker_address).await?;
        let pop = inner.generate_pop(&keypair).await?;

        let script_data = StakingScriptData::new(
            XOnlyPublicKey::from_keypair(&keypair).0,
            validator_pk,
            params.jury_key,
            staking_time_blocks,
        )
        .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        let output = staking_output(&script_data, staking_amount)?;
        let fee_rate = inner.fee_estimator.estimate_fee_per_kb();
        let staking_tx = inner
            .wallet
            .create_and_sign_tx(vec![output.clone()], fee_rate, &staker_address)
            .await?;

        // funding may reorder outputs, locate ours by script
        let staking_output_index = staking_tx
            .output
            .iter()
            .position(|out| out.script_pubkey == output.script_pubkey)
            .ok_or_else(|| {
                EngineError::Fatal("wallet dropped the staking output while funding".to_string())
            })? as u32;

        info!(
            %staker_address,
            staking_amount = %staking_amount,
            staking_txid = %staking_tx.compute_txid(),
            fee_rate = %fee_rate,
            "created and signed staking transaction"
        );

        let (reply, reply_rx) = oneshot::channel();
        let request = StakingRequest {
            staking_tx,
            staking_output_index,
            staking_output_script: output.script_pubkey,
            script_data,
            required_depth: params.confirmation_depth as u32,
            pop,
            staker_address,
            watched: None,
            reply,
        };

        inner
            .send_request(&inner.channels.staking_request, request, reply_rx)
            .await
    }

    /// Registers an externally built and broadcast staking transaction for
    /// tracking. The daemon never signs or rebroadcasts it.
    #[allow(clippy::too_many_arguments)]
    pub async fn watch_staking(
        &self,
        staking_tx: Transaction,
        staking_output_index: u32,
        script_data: StakingScriptData,
        slashing_tx: Transaction,
        staker_slashing_sig: schnorr::Signature,
        staker_coordinator_pk: PublicKey,
        staker_address: Address,
        pop: ProofOfPossession,
    ) -> Result<Txid, EngineError> {
        let inner = &self.inner;
        if inner.quit.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let params = inner.coordinator.params().await?;

        let staking_output = staking_tx
            .output
            .get(staking_output_index as usize)
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "staking output index {staking_output_index} out of bounds"
                ))
            })?
            .clone();

        let expected_script = staking_script_pubkey(&script_data)?;
        if staking_output.script_pubkey != expected_script {
            return Err(EngineError::InvalidArgument(
                "staking output does not match the provided script data".to_string(),
            ));
        }

        if script_data.jury_key != params.jury_key {
            return Err(EngineError::InvalidArgument(
                "staking script commits to an unknown jury key".to_string(),
            ));
        }

        check_staking_time(
            script_data.lock_time,
            params.finalization_timeout,
            params.confirmation_depth,
        )?;

        let staking_txid = staking_tx.compute_txid();
        let spends_staking_output = slashing_tx.input.first().is_some_and(|input| {
            input.previous_output
                == OutPoint {
                    txid: staking_txid,
                    vout: staking_output_index,
                }
        });
        if !spends_staking_output {
            return Err(EngineError::InvalidArgument(
                "slashing transaction does not spend the staking output".to_string(),
            ));
        }

        inner.ensure_validator_exists(&script_data.validator_key).await?;

        info!(
            %staker_address,
            %staking_txid,
            staking_amount = %staking_output.value,
            "received valid staking tx to watch"
        );

        let (reply, reply_rx) = oneshot::channel();
        let request = StakingRequest {
            staking_tx,
            staking_output_index,
            staking_output_script: staking_output.script_pubkey,
            script_data,
            required_depth: params.confirmation_depth as u32,
            pop,
            staker_address,
            watched: Some(WatchedData {
                slashing_tx,
                staker_slashing_sig,
                staker_coordinator_pk,
            }),
            reply,
        };

        inner
            .send_request(&inner.channels.staking_request, request, reply_rx)
            .await
    }

    /// Starts early unbonding: builds the undelegation, registers it with the
    /// coordinator and returns the unbonding txid. The rest of the process
    /// (signature collection, Bitcoin broadcast, confirmation) continues in
    /// the background.
    pub async fn unbond_staking(
        &self,
        staking_txid: Txid,
        fee_rate: Option<Amount>,
    ) -> Result<Txid, EngineError> {
        let inner = &self.inner;
        if inner.quit.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let fee_rate = fee_rate.unwrap_or_else(|| inner.fee_estimator.estimate_fee_per_kb());

        let record = inner.tracker.get_transaction(&staking_txid).await?;

        if record.is_watched() {
            return Err(EngineError::InvalidArgument(
                "cannot unbond watched transaction".to_string(),
            ));
        }

        if record.state != TxState::SentToCoordinator {
            return Err(EngineError::InvalidArgument(format!(
                "cannot unbond transaction in state {}",
                record.state
            )));
        }

        check_fee_rate(fee_rate)?;

        let params = inner.coordinator.params().await?;
        let staker_address = inner.parse_staker_address(&record)?;

        inner.wallet.unlock_wallet(WALLET_UNLOCK_TIMEOUT_SECS).await?;
        let keypair = inner.staker_keypair(&staker_address).await?;

        let undelegation = build_undelegation_data(
            &record.staking_tx,
            record.staking_output_index,
            &record.script_data,
            params.finalization_timeout,
            fee_rate,
            &keypair,
        )?;

        debug!(
            %staking_txid,
            unbonding_txid = %undelegation.unbonding_tx.compute_txid(),
            fee_rate = %fee_rate,
            "successfully created undelegation data"
        );

        let (reply, reply_rx) = oneshot::channel();
        let request = UnbondingRequest {
            staking_txid,
            undelegation,
            reply,
        };

        inner
            .send_request(&inner.channels.unbonding_request, request, reply_rx)
            .await
    }

    /// Spends the stake back to the staker address. Works from
    /// `SentToCoordinator` (timelock path of the staking output) and from
    /// `UnbondingConfirmedOnBtc` (timelock path of the unbonding output).
    /// Maturity is not checked locally; a premature broadcast fails in the
    /// mempool with a sequence-lock error.
    pub async fn spend_stake(&self, staking_txid: Txid) -> Result<(Txid, Amount), EngineError> {
        let inner = &self.inner;
        if inner.quit.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let record = inner.tracker.get_transaction(&staking_txid).await?;

        if record.is_watched() {
            return Err(EngineError::InvalidArgument(
                "cannot spend watched transaction".to_string(),
            ));
        }

        let dest_address = inner.parse_staker_address(&record)?;

        let (funding_outpoint, funding_output, script_data) = match record.state {
            TxState::SentToCoordinator => (
                OutPoint {
                    txid: record.staking_txid(),
                    vout: record.staking_output_index,
                },
                record.staking_output().clone(),
                record.script_data,
            ),
            TxState::UnbondingConfirmedOnBtc => {
                let unbonding = record.unbonding.as_ref().ok_or_else(|| {
                    EngineError::Fatal(format!(
                        "record {staking_txid} in UnbondingConfirmedOnBtc without unbonding data"
                    ))
                })?;
                (
                    OutPoint {
                        txid: unbonding.unbonding_tx.compute_txid(),
                        vout: 0,
                    },
                    unbonding.unbonding_tx.output[0].clone(),
                    unbonding.script_data,
                )
            }
            state => {
                return Err(EngineError::InvalidArgument(format!(
                    "cannot spend stake in state {state}"
                )))
            }
        };

        inner.wallet.unlock_wallet(WALLET_UNLOCK_TIMEOUT_SECS).await?;
        let keypair = inner.staker_keypair(&dest_address).await?;

        let fee_rate = inner.fee_estimator.estimate_fee_per_kb();
        let spend = build_spend_stake_tx(
            funding_outpoint,
            &funding_output,
            &script_data,
            dest_address.script_pubkey(),
            fee_rate,
            &keypair,
        )?;

        let spend_txid = inner.wallet.send_raw_transaction(&spend.tx).await?;
        let spend_value = spend.tx.output[0].value;

        info!(
            %staking_txid,
            %spend_txid,
            spend_value = %spend_value,
            fee = %spend.fee,
            dest_address = %dest_address,
            "successfully sent transaction spending the staking output"
        );

        let event = inner
            .notifier
            .register_confirmations(ConfirmationRequest {
                txid: spend_txid,
                script_pubkey: spend.tx.output[0].script_pubkey.clone(),
                num_confs: SPEND_STAKE_TX_CONFIRMATIONS,
                height_hint: self.best_block_height(),
                include_block: false,
            })
            .await?;

        let task_inner = inner.clone();
        inner.spawn_tracked(async move {
            task_inner
                .wait_for_spend_confirmation(staking_txid, event)
                .await;
        });

        Ok((spend_txid, spend_value))
    }

    /// The staking output an external wallet must create for these
    /// parameters, after the same validation a `stake` call performs.
    pub async fn stake_output(
        &self,
        staker_pk: XOnlyPublicKey,
        validator_pk: XOnlyPublicKey,
        staking_amount: Amount,
        staking_time_blocks: u16,
    ) -> Result<TxOut, EngineError> {
        let inner = &self.inner;
        let params = inner.coordinator.params().await?;

        let slashing_fee = effective_slashing_fee(params.min_slashing_fee);
        check_staking_amount(staking_amount, slashing_fee)?;
        check_staking_time(
            staking_time_blocks,
            params.finalization_timeout,
            params.confirmation_depth,
        )?;

        let script_data =
            StakingScriptData::new(staker_pk, validator_pk, params.jury_key, staking_time_blocks)
                .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        Ok(staking_output(&script_data, staking_amount)?)
    }

    /// Pages through all tracked transactions.
    pub async fn stored_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<StoredTransactionQueryResult, EngineError> {
        Ok(self
            .inner
            .tracker
            .query_stored_transactions(StoredTransactionQuery {
                index_offset: offset,
                num_max_transactions: limit,
                reversed: false,
                withdrawable_at_height: None,
            })
            .await?)
    }

    /// Pages through transactions whose stake is spendable right now.
    pub async fn withdrawable_transactions(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<StoredTransactionQueryResult, EngineError> {
        let height = self.best_block_height();
        Ok(self
            .inner
            .tracker
            .query_stored_transactions(
                StoredTransactionQuery {
                    index_offset: offset,
                    num_max_transactions: limit,
                    reversed: false,
                    withdrawable_at_height: None,
                }
                .withdrawable_at(height),
            )
            .await?)
    }

    /// Fetches a single tracked transaction.
    pub async fn get_stored_transaction(
        &self,
        staking_txid: &Txid,
    ) -> Result<TrackedTransaction, EngineError> {
        Ok(self.inner.tracker.get_transaction(staking_txid).await?)
    }

    /// Lists unspent wallet outputs.
    pub async fn list_unspent_outputs(&self) -> Result<Vec<Utxo>, EngineError> {
        Ok(self.inner.wallet.list_outputs(false).await?)
    }

    /// Lists validators registered on the coordinator.
    pub async fn list_active_validators(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<ValidatorsResponse, EngineError> {
        Ok(self.inner.coordinator.query_validators(limit, offset).await?)
    }
}

impl Inner {
    pub(crate) fn spawn_tracked(
        &self,
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let handle = tokio::spawn(fut);
        self.tasks
            .lock()
            .expect("tasks mutex must not be poisoned")
            .push(handle);
    }

    pub(crate) fn best_height(&self) -> u32 {
        self.best_block_height.load(Ordering::SeqCst)
    }

    async fn ensure_validator_exists(
        &self,
        validator_pk: &XOnlyPublicKey,
    ) -> Result<(), EngineError> {
        if !self.coordinator.validator_exists(validator_pk).await? {
            return Err(EngineError::InvalidArgument(format!(
                "validator {validator_pk} is not registered on the coordinator"
            )));
        }
        Ok(())
    }

    /// Dumps the staker's private key from the wallet. The wallet must be
    /// unlocked.
    async fn staker_keypair(&self, staker_address: &Address) -> Result<Keypair, EngineError> {
        let secret_key = self.wallet.dump_private_key(staker_address).await?;
        let secp = Secp256k1::new();
        Ok(Keypair::from_secret_key(&secp, &secret_key))
    }

    pub(crate) fn parse_staker_address(
        &self,
        record: &TrackedTransaction,
    ) -> Result<Address, EngineError> {
        Address::from_str(&record.staker_address)
            .ok()
            .and_then(|a| a.require_network(self.network).ok())
            .ok_or_else(|| {
                // can happen when the daemon was restarted on the wrong network
                EngineError::InvalidArgument(format!(
                    "stored staker address {} is not valid for network {}",
                    record.staker_address, self.network
                ))
            })
    }

    /// Builds the proof of possession. Requires the wallet to be unlocked.
    async fn generate_pop(&self, keypair: &Keypair) -> Result<ProofOfPossession, EngineError> {
        let payload = pop_payload(keypair);
        let coordinator_sig = self.coordinator.sign(&payload).await?;
        Ok(build_proof_of_possession(keypair, coordinator_sig))
    }

    async fn send_request<T, R>(
        &self,
        channel: &mpsc::Sender<R>,
        request: R,
        reply_rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError>
    where
        R: Send,
        T: Send,
    {
        if !push_or_quit(channel, request, &self.quit).await {
            return Err(EngineError::ShuttingDown);
        }

        tokio::select! {
            _ = self.quit.cancelled() => Err(EngineError::ShuttingDown),
            reply = reply_rx => reply.map_err(|_| EngineError::ShuttingDown)?,
        }
    }

    async fn handle_new_blocks(
        self: Arc<Self>,
        mut blocks: staker_btc_notify::Subscription<staker_btc_notify::BlockEvent>,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => return,
                block = blocks.recv() => {
                    let Some(block) = block else { return };
                    self.best_block_height.store(block.height, Ordering::SeqCst);
                    debug!(
                        btc_block_height = %block.height,
                        btc_block_hash = %block.hash,
                        "received new best btc block"
                    );
                }
            }
        }
    }

    /// Registers the confirmation watch for a staking transaction and spawns
    /// the task that forwards its confirmation to the event loop.
    pub(crate) async fn wait_for_staking_tx_confirmation(
        inner: &Arc<Inner>,
        staking_txid: Txid,
        staking_output_script: bitcoin::ScriptBuf,
        required_depth: u32,
        height_hint: u32,
    ) -> Result<(), EngineError> {
        debug!(%staking_txid, "registering staking tx confirmation watch");

        let event = inner
            .notifier
            .register_confirmations(ConfirmationRequest {
                txid: staking_txid,
                script_pubkey: staking_output_script,
                num_confs: required_depth + 1,
                height_hint,
                include_block: true,
            })
            .await?;

        let task_inner = inner.clone();
        inner.spawn_tracked(async move {
            task_inner
                .forward_staking_confirmation(staking_txid, event)
                .await;
        });

        Ok(())
    }

    async fn forward_staking_confirmation(
        self: Arc<Self>,
        staking_txid: Txid,
        mut event: ConfirmationEvent,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => {
                    event.cancel();
                    return;
                }
                ntfn = event.events.recv() => match ntfn {
                    Some(ConfNtfn::Updates(left)) => {
                        debug!(%staking_txid, conf_left = %left, "staking tx received confirmation");
                    }
                    Some(ConfNtfn::Confirmed(conf)) => {
                        let _ = push_or_quit(
                            &self.channels.btc_confirmed,
                            StakingTxConfirmation {
                                staking_txid,
                                tx_index: conf.tx_index,
                                block_hash: conf.block_hash,
                                block_height: conf.block_height,
                                inclusion_block: conf.block,
                            },
                            &self.quit,
                        )
                        .await;
                        event.cancel();
                        return;
                    }
                    None => return,
                }
            }
        }
    }

    /// Task that talks to the coordinator: delegation submissions and
    /// undelegation registrations, kept off the main loop so chain events
    /// keep flowing while RPCs are in flight.
    async fn handle_sent_to_coordinator(
        self: Arc<Self>,
        mut delegation_send: mpsc::Receiver<DelegationSendRequest>,
        mut unbonding_request: mpsc::Receiver<UnbondingRequest>,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => return,
                Some(req) = delegation_send.recv() => {
                    let staking_txid = req.staking_txid;
                    let result = self.send_delegation(req).await;
                    if !push_or_quit(
                        &self.channels.delegation_done,
                        DelegationSendResult { staking_txid, result },
                        &self.quit,
                    )
                    .await
                    {
                        return;
                    }
                }
                Some(req) = unbonding_request.recv() => {
                    match self
                        .coordinator
                        .submit_undelegation(&req.staking_txid, req.undelegation.clone())
                        .await
                    {
                        Ok(()) => {
                            let ack = UnbondingStartedAck {
                                staking_txid: req.staking_txid,
                                unbonding_tx: req.undelegation.unbonding_tx,
                                script_data: req.undelegation.script_data,
                                reply: Some(req.reply),
                            };
                            if !push_or_quit(&self.channels.unbonding_ack, ack, &self.quit).await {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(staking_txid = %req.staking_txid, err = %e, "undelegation submission failed");
                            let _ = req.reply.send(Err(e.into()));
                        }
                    }
                }
            }
        }
    }

    async fn send_delegation(
        &self,
        req: DelegationSendRequest,
    ) -> Result<(), EngineError> {
        let record = self.tracker.get_transaction(&req.staking_txid).await?;

        let inclusion_proof = build_inclusion_proof(&req.inclusion_block, req.staking_txid)?;

        let (slashing_tx, staker_slashing_sig, staker_coordinator_pk) = match &record.watched {
            Some(watched) => (
                watched.slashing_tx.clone(),
                watched.staker_slashing_sig,
                watched.staker_coordinator_pk,
            ),
            None => {
                let params = self.coordinator.params().await?;
                let slashing_address = Address::from_str(&params.slashing_address)
                    .ok()
                    .and_then(|a| a.require_network(self.network).ok())
                    .ok_or_else(|| {
                        EngineError::Fatal(format!(
                            "coordinator reported invalid slashing address {}",
                            params.slashing_address
                        ))
                    })?;

                let staker_address = self.parse_staker_address(&record)?;
                self.wallet.unlock_wallet(WALLET_UNLOCK_TIMEOUT_SECS).await?;
                let keypair = self.staker_keypair(&staker_address).await?;

                let slashing = build_slashing_tx(
                    &record.staking_tx,
                    record.staking_output_index,
                    &record.script_data,
                    slashing_address.script_pubkey(),
                    effective_slashing_fee(params.min_slashing_fee),
                    &keypair,
                )?;

                (slashing.tx, slashing.staker_sig, self.coordinator.pub_key())
            }
        };

        let delegation = DelegationData {
            staking_tx: record.staking_tx.clone(),
            staking_output_index: record.staking_output_index,
            inclusion_proof,
            script_data: record.script_data,
            slashing_tx,
            staker_slashing_sig,
            staker_coordinator_pk,
            pop: record.pop.clone(),
        };

        Ok(self.coordinator.submit_delegation(delegation).await?)
    }

    /// The main event loop: the single writer of delegation state.
    #[allow(clippy::too_many_arguments)]
    async fn handle_staking(
        self: Arc<Self>,
        mut staking_request: mpsc::Receiver<StakingRequest>,
        mut btc_confirmed: mpsc::Receiver<StakingTxConfirmation>,
        mut delegation_done: mpsc::Receiver<DelegationSendResult>,
        mut unbonding_ack: mpsc::Receiver<UnbondingStartedAck>,
        mut unbonding_sigs: mpsc::Receiver<UnbondingSignaturesEvent>,
        mut unbonding_confirmed: mpsc::Receiver<UnbondingTxConfirmation>,
        mut spend_confirmed: mpsc::Receiver<SpendConfirmation>,
    ) -> Result<(), EngineError> {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => return Ok(()),

                Some(req) = staking_request.recv() => {
                    Inner::on_staking_request(&self, req).await;
                }

                Some(ev) = btc_confirmed.recv() => {
                    self.on_btc_confirmed(ev).await?;
                }

                Some(res) = delegation_done.recv() => {
                    self.on_delegation_done(res).await?;
                }

                Some(ack) = unbonding_ack.recv() => {
                    Inner::on_unbonding_ack(&self, ack).await?;
                }

                Some(ev) = unbonding_sigs.recv() => {
                    Inner::on_unbonding_signatures(&self, ev).await?;
                }

                Some(ev) = unbonding_confirmed.recv() => {
                    self.on_unbonding_confirmed(ev).await?;
                }

                Some(ev) = spend_confirmed.recv() => {
                    self.on_spend_confirmed(ev).await?;
                }
            }
        }
    }

    async fn on_staking_request(inner: &Arc<Inner>, req: StakingRequest) {
        let staking_txid = req.staking_tx.compute_txid();
        let best_block_height = inner.best_height();

        info!(
            %staking_txid,
            %best_block_height,
            watched = req.is_watched(),
            "received new staking request"
        );

        if let Some(watched) = req.watched.clone() {
            if let Err(e) = inner
                .tracker
                .add_watched_transaction(
                    req.staking_tx.clone(),
                    req.staking_output_index,
                    req.script_data,
                    req.pop.clone(),
                    req.staker_address.to_string(),
                    watched,
                )
                .await
            {
                let _ = req.reply.send(Err(e.into()));
                return;
            }
        } else {
            // owned transactions are broadcast first, then tracked
            if let Err(e) = inner.wallet.send_raw_transaction(&req.staking_tx).await {
                let _ = req.reply.send(Err(e.into()));
                return;
            }

            if let Err(e) = inner
                .tracker
                .add_transaction(
                    req.staking_tx.clone(),
                    req.staking_output_index,
                    req.script_data,
                    req.pop.clone(),
                    req.staker_address.to_string(),
                )
                .await
            {
                let _ = req.reply.send(Err(e.into()));
                return;
            }
        }

        if let Err(e) = Inner::wait_for_staking_tx_confirmation(
            inner,
            staking_txid,
            req.staking_output_script.clone(),
            req.required_depth,
            best_block_height,
        )
        .await
        {
            let _ = req.reply.send(Err(e));
            return;
        }

        info!(
            %staking_txid,
            conf_left = %req.required_depth,
            watched = req.is_watched(),
            "staking transaction successfully registered"
        );

        let _ = req.reply.send(Ok(staking_txid));
    }

    async fn on_btc_confirmed(&self, ev: StakingTxConfirmation) -> Result<(), EngineError> {
        match self
            .tracker
            .set_confirmed(&ev.staking_txid, ev.block_hash, ev.block_height)
            .await
        {
            Ok(()) => {}
            Err(DbError::InvalidStateTransition { .. }) => {
                // re-delivered confirmation; the record already advanced
                warn!(staking_txid = %ev.staking_txid, "duplicate confirmation event, ignoring");
                return Ok(());
            }
            Err(e) => {
                // a confirmation for a tx we do not track is a programming error
                error!(staking_txid = %ev.staking_txid, err = %e, "failed to set tx confirmed");
                return Err(EngineError::Fatal(format!(
                    "confirmation for unknown tx {}: {e}",
                    ev.staking_txid
                )));
            }
        }

        info!(
            staking_txid = %ev.staking_txid,
            block_hash = %ev.block_hash,
            block_height = %ev.block_height,
            "btc transaction confirmed"
        );

        let Some(inclusion_block) = ev.inclusion_block else {
            return Err(EngineError::Fatal(format!(
                "confirmation for {} delivered without the inclusion block",
                ev.staking_txid
            )));
        };

        let _ = push_or_quit(
            &self.channels.delegation_send,
            DelegationSendRequest {
                staking_txid: ev.staking_txid,
                tx_index: ev.tx_index,
                inclusion_block,
            },
            &self.quit,
        )
        .await;

        Ok(())
    }

    async fn on_delegation_done(&self, res: DelegationSendResult) -> Result<(), EngineError> {
        if let Err(e) = res.result {
            // no recovery path yet: a delegation that confirmed on Bitcoin
            // but cannot be registered leaves the stake in limbo
            error!(staking_txid = %res.staking_txid, err = %e, "error sending delegation to coordinator");
            return Err(EngineError::Fatal(format!(
                "failed to send delegation for {}: {e}",
                res.staking_txid
            )));
        }

        match self.tracker.set_sent_to_coordinator(&res.staking_txid).await {
            Ok(()) => {}
            Err(DbError::InvalidStateTransition { .. }) => {
                warn!(staking_txid = %res.staking_txid, "delegation already recorded, ignoring");
                return Ok(());
            }
            Err(e) => {
                error!(staking_txid = %res.staking_txid, err = %e, "failed to set tx sent to coordinator");
                return Err(EngineError::Fatal(format!(
                    "delegation result for unknown tx {}: {e}",
                    res.staking_txid
                )));
            }
        }

        info!(
            staking_txid = %res.staking_txid,
            "btc transaction successfully registered as a delegation"
        );

        Ok(())
    }

    async fn on_unbonding_ack(
        inner: &Arc<Inner>,
        ack: UnbondingStartedAck,
    ) -> Result<(), EngineError> {
        let unbonding_txid = ack.unbonding_tx.compute_txid();

        match inner
            .tracker
            .set_unbonding_started(&ack.staking_txid, ack.unbonding_tx, ack.script_data)
            .await
        {
            Ok(()) => {}
            Err(DbError::InvalidStateTransition { .. }) => {
                warn!(staking_txid = %ack.staking_txid, "unbonding already recorded, ignoring");
                if let Some(reply) = ack.reply {
                    let _ = reply.send(Ok(unbonding_txid));
                }
                return Ok(());
            }
            Err(e) => {
                error!(staking_txid = %ack.staking_txid, err = %e, "failed to set unbonding started");
                return Err(EngineError::Fatal(format!(
                    "unbonding ack for unknown tx {}: {e}",
                    ack.staking_txid
                )));
            }
        }

        debug!(
            staking_txid = %ack.staking_txid,
            %unbonding_txid,
            "undelegation registered with the coordinator, waiting for signatures"
        );

        let task_inner = inner.clone();
        let staking_txid = ack.staking_txid;
        inner.spawn_tracked(async move {
            task_inner.poll_unbonding_signatures(staking_txid).await;
        });

        if let Some(reply) = ack.reply {
            let _ = reply.send(Ok(unbonding_txid));
        }

        Ok(())
    }

    async fn on_unbonding_signatures(
        inner: &Arc<Inner>,
        ev: UnbondingSignaturesEvent,
    ) -> Result<(), EngineError> {
        match inner
            .tracker
            .set_unbonding_signatures_received(&ev.staking_txid, ev.validator_sig, ev.jury_sig)
            .await
        {
            Ok(()) => {}
            Err(DbError::InvalidStateTransition { .. }) => {
                warn!(staking_txid = %ev.staking_txid, "unbonding signatures already recorded, ignoring");
                return Ok(());
            }
            Err(e) => {
                error!(staking_txid = %ev.staking_txid, err = %e, "failed to set unbonding signatures");
                return Err(EngineError::Fatal(format!(
                    "unbonding signatures for unknown tx {}: {e}",
                    ev.staking_txid
                )));
            }
        }

        let record = inner
            .tracker
            .get_transaction(&ev.staking_txid)
            .await
            .map_err(|e| EngineError::Fatal(format!("record for {} missing: {e}", ev.staking_txid)))?;

        debug!(
            staking_txid = %ev.staking_txid,
            "initiating unbonding tx broadcast and confirmation wait"
        );

        let task_inner = inner.clone();
        let staking_txid = ev.staking_txid;
        inner.spawn_tracked(async move {
            task_inner
                .send_unbonding_tx_to_btc_and_wait(staking_txid, record)
                .await;
        });

        Ok(())
    }

    async fn on_unbonding_confirmed(&self, ev: UnbondingTxConfirmation) -> Result<(), EngineError> {
        match self
            .tracker
            .set_unbonding_confirmed_on_btc(&ev.staking_txid, ev.block_hash, ev.block_height)
            .await
        {
            Ok(()) => Ok(()),
            Err(DbError::InvalidStateTransition { .. }) => {
                warn!(staking_txid = %ev.staking_txid, "unbonding confirmation already recorded, ignoring");
                Ok(())
            }
            Err(e) => {
                error!(staking_txid = %ev.staking_txid, err = %e, "failed to set unbonding confirmed");
                Err(EngineError::Fatal(format!(
                    "unbonding confirmation for unknown tx {}: {e}",
                    ev.staking_txid
                )))
            }
        }
    }

    async fn on_spend_confirmed(&self, ev: SpendConfirmation) -> Result<(), EngineError> {
        match self.tracker.set_spent_on_btc(&ev.staking_txid).await {
            Ok(()) => {
                info!(
                    staking_txid = %ev.staking_txid,
                    "staking transaction successfully spent and confirmed on btc"
                );
                Ok(())
            }
            Err(DbError::InvalidStateTransition { .. }) => {
                warn!(staking_txid = %ev.staking_txid, "spend already recorded, ignoring");
                Ok(())
            }
            Err(e) => {
                error!(staking_txid = %ev.staking_txid, err = %e, "failed to set tx spent");
                Err(EngineError::Fatal(format!(
                    "spend confirmation for unknown tx {}: {e}",
                    ev.staking_txid
                )))
            }
        }
    }

    /// Polls the coordinator until both unbonding co-signatures are
    /// available, then notifies the event loop.
    pub(crate) async fn poll_unbonding_signatures(self: Arc<Self>, staking_txid: Txid) {
        debug!(%staking_txid, "polling coordinator for unbonding signatures");

        loop {
            tokio::select! {
                _ = self.quit.cancelled() => return,
                _ = tokio::time::sleep(UNBONDING_SIGNATURES_POLL_INTERVAL) => {}
            }

            match self.coordinator.query_unbonding_signatures(&staking_txid).await {
                Ok(sigs) => {
                    if let (Some(validator_sig), Some(jury_sig)) =
                        (sigs.validator_sig, sigs.jury_sig)
                    {
                        debug!(%staking_txid, "unbonding signatures collected");
                        let _ = push_or_quit(
                            &self.channels.unbonding_sigs,
                            UnbondingSignaturesEvent {
                                staking_txid,
                                validator_sig,
                                jury_sig,
                            },
                            &self.quit,
                        )
                        .await;
                        return;
                    }
                }
                Err(e) => {
                    warn!(%staking_txid, err = %e, "failed to query unbonding signatures");
                }
            }
        }
    }

    /// Signs the unbonding path witness with a freshly dumped staker key and
    /// broadcasts the unbonding transaction.
    async fn broadcast_unbonding_tx(
        &self,
        staking_txid: &Txid,
        record: &TrackedTransaction,
        unbonding: &UnbondingStoreData,
    ) -> Result<Txid, EngineError> {
        let (Some(validator_sig), Some(jury_sig)) =
            (unbonding.validator_sig, unbonding.jury_sig)
        else {
            return Err(EngineError::Fatal(format!(
                "record {staking_txid} reached unbonding broadcast without co-signatures"
            )));
        };

        let staker_address = self.parse_staker_address(record)?;
        self.wallet.unlock_wallet(WALLET_UNLOCK_TIMEOUT_SECS).await?;
        let keypair = self.staker_keypair(&staker_address).await?;

        let leaf = StakingPaths::new(&record.script_data).unbonding_script;
        let sighash =
            script_spend_sighash(&unbonding.unbonding_tx, record.staking_output(), &leaf)?;
        let secp = Secp256k1::new();
        let staker_sig = secp.sign_schnorr(&Message::from_digest(sighash), &keypair);

        let witness =
            unbonding_path_witness(&record.script_data, &staker_sig, &validator_sig, &jury_sig)?;

        let mut unbonding_tx = unbonding.unbonding_tx.clone();
        unbonding_tx.input[0].witness = witness;

        Ok(self.wallet.send_raw_transaction(&unbonding_tx).await?)
    }

    /// Broadcasts the unbonding transaction and watches it to depth,
    /// retrying both steps until success or shutdown.
    pub(crate) async fn send_unbonding_tx_to_btc_and_wait(
        self: Arc<Self>,
        staking_txid: Txid,
        record: TrackedTransaction,
    ) {
        if self.quit.is_cancelled() {
            return;
        }

        let Some(unbonding) = record.unbonding.clone() else {
            error!(%staking_txid, "unbonding broadcast requested without unbonding data");
            return;
        };
        let unbonding_txid = unbonding.unbonding_tx.compute_txid();

        loop {
            match self
                .broadcast_unbonding_tx(&staking_txid, &record, &unbonding)
                .await
            {
                Ok(_) => {
                    info!(%staking_txid, %unbonding_txid, "unbonding transaction successfully sent to btc");
                    break;
                }
                Err(e) => {
                    error!(%staking_txid, %unbonding_txid, err = %e, "failed to send unbonding tx to btc, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(UNBONDING_SEND_RETRY_TIMEOUT) => {}
                _ = self.quit.cancelled() => return,
            }
        }

        let event = loop {
            match self
                .notifier
                .register_confirmations(ConfirmationRequest {
                    txid: unbonding_txid,
                    script_pubkey: unbonding.unbonding_tx.output[0].script_pubkey.clone(),
                    num_confs: UNBONDING_TX_CONFIRMATIONS,
                    height_hint: self.best_height(),
                    include_block: false,
                })
                .await
            {
                Ok(event) => {
                    debug!(%staking_txid, %unbonding_txid, "notification event for unbonding tx created");
                    break event;
                }
                Err(e) => {
                    error!(%staking_txid, %unbonding_txid, err = %e, "failed to register unbonding confirmation watch, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(UNBONDING_SEND_RETRY_TIMEOUT) => {}
                _ = self.quit.cancelled() => return,
            }
        };

        self.wait_for_unbonding_tx_confirmation(staking_txid, unbonding_txid, event)
            .await;
    }

    pub(crate) async fn wait_for_unbonding_tx_confirmation(
        &self,
        staking_txid: Txid,
        unbonding_txid: Txid,
        mut event: ConfirmationEvent,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => {
                    event.cancel();
                    return;
                }
                ntfn = event.events.recv() => match ntfn {
                    Some(ConfNtfn::Updates(left)) => {
                        debug!(%unbonding_txid, conf_left = %left, "unbonding tx received confirmation");
                    }
                    Some(ConfNtfn::Confirmed(conf)) => {
                        debug!(
                            %staking_txid,
                            %unbonding_txid,
                            block_hash = %conf.block_hash,
                            block_height = %conf.block_height,
                            "unbonding tx confirmed"
                        );
                        let _ = push_or_quit(
                            &self.channels.unbonding_confirmed,
                            UnbondingTxConfirmation {
                                staking_txid,
                                block_hash: conf.block_hash,
                                block_height: conf.block_height,
                            },
                            &self.quit,
                        )
                        .await;
                        event.cancel();
                        return;
                    }
                    None => return,
                }
            }
        }
    }

    /// Waits for the spend transaction to settle, with a wall-clock bound;
    /// on timeout the delegation simply stays in its current state.
    async fn wait_for_spend_confirmation(&self, staking_txid: Txid, mut event: ConfirmationEvent) {
        if self.quit.is_cancelled() {
            event.cancel();
            return;
        }

        let deadline = tokio::time::sleep(SPEND_CONFIRMATION_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    // stuck in the mempool; leave the record as-is
                    debug!(%staking_txid, "timed out waiting for spend confirmation");
                    event.cancel();
                    return;
                }
                _ = self.quit.cancelled() => {
                    event.cancel();
                    return;
                }
                ntfn = event.events.recv() => match ntfn {
                    Some(ConfNtfn::Updates(_)) => {}
                    Some(ConfNtfn::Confirmed(_)) => {
                        let _ = push_or_quit(
                            &self.channels.spend_confirmed,
                            SpendConfirmation { staking_txid },
                            &self.quit,
                        )
                        .await;
                        event.cancel();
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

impl StakerApp {
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}
