//! End-to-end engine scenarios against in-memory collaborators.

use std::{sync::Arc, time::Duration};

use bitcoin::{
    absolute::LockTime, hashes::Hash, transaction::Version, Amount, Network, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, Txid, Witness,
};
use staker_btc_notify::TxConfirmation;
use staker_coordinator::{DelegationDetails, UnbondingSignatures, UndelegationInfo};
use staker_db::{inmemory::InMemoryTracker, TransactionTracker, TxState};
use staker_primitives::StakingScriptData;
use staker_tx_builder::{
    slashing::build_slashing_tx, staking::staking_output, unbonding::build_undelegation_data,
};
use tokio::time::timeout;

use crate::{
    app::StakerApp,
    errors::EngineError,
    fee::StaticFeeEstimator,
    testing::{
        block_with, default_script_data, dummy_sig_pair, test_address, test_keypair, test_pop,
        test_signature, xonly, MockCoordinator, MockNotifier, MockWallet,
    },
};

struct Harness {
    app: StakerApp,
    wallet: Arc<MockWallet>,
    coordinator: Arc<MockCoordinator>,
    notifier: Arc<MockNotifier>,
    tracker: Arc<InMemoryTracker>,
}

fn harness() -> Harness {
    let wallet = Arc::new(MockWallet::with_key(&test_address(1), 1));
    let coordinator = Arc::new(MockCoordinator::new());
    let notifier = Arc::new(MockNotifier::new(100));
    let tracker = Arc::new(InMemoryTracker::new());

    let app = StakerApp::new(
        Network::Regtest,
        wallet.clone(),
        coordinator.clone(),
        notifier.clone(),
        Arc::new(StaticFeeEstimator::new(Amount::from_sat(2_000))),
        tracker.clone(),
    );

    Harness {
        app,
        wallet,
        coordinator,
        notifier,
        tracker,
    }
}

async fn wait_for_state(tracker: &InMemoryTracker, staking_txid: Txid, state: TxState) {
    timeout(Duration::from_secs(600), async {
        loop {
            let reached = tracker
                .get_transaction(&staking_txid)
                .await
                .map(|r| r.state == state)
                .unwrap_or(false);
            if reached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {staking_txid} to reach {state}"));
}

fn confirm_staking(notifier: &MockNotifier, staking_tx: &Transaction, height: u32) {
    let block = block_with(vec![staking_tx.clone()]);
    notifier.confirm(
        staking_tx.compute_txid(),
        TxConfirmation {
            tx: staking_tx.clone(),
            tx_index: 0,
            block_hash: block.block_hash(),
            block_height: height,
            block: Some(block),
        },
    );
}

/// Drives an owned stake of 100k sats all the way to `SentToCoordinator`.
async fn stake_to_coordinator(h: &Harness) -> Txid {
    let staking_txid = h
        .app
        .stake_funds(
            test_address(1),
            Amount::from_sat(100_000),
            xonly(2),
            1_000,
        )
        .await
        .expect("staking request must succeed");

    let staking_tx = h.wallet.broadcast_txs()[0].clone();
    confirm_staking(&h.notifier, &staking_tx, 101);
    wait_for_state(&h.tracker, staking_txid, TxState::SentToCoordinator).await;
    staking_txid
}

/// An externally built staking transaction for the watched flow, with its
/// slashing transaction pre-signed by the external staker key.
fn watched_staking_setup() -> (Transaction, StakingScriptData, Transaction) {
    let script_data = StakingScriptData::new(xonly(8), xonly(2), xonly(3), 300).unwrap();
    let staking_tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 7,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![staking_output(&script_data, Amount::from_sat(100_000)).unwrap()],
    };
    let slashing = build_slashing_tx(
        &staking_tx,
        0,
        &script_data,
        test_address(9).script_pubkey(),
        Amount::from_sat(1_000),
        &test_keypair(8),
    )
    .unwrap();

    (staking_tx, script_data, slashing.tx)
}

#[tokio::test(start_paused = true)]
async fn happy_owned_stake_reaches_coordinator() {
    let h = harness();
    h.app.start().await.unwrap();

    let staking_txid = h
        .app
        .stake_funds(
            test_address(1),
            Amount::from_sat(100_000),
            xonly(2),
            1_000,
        )
        .await
        .unwrap();

    // the tx is broadcast and tracked before the request is acknowledged
    let broadcast = h.wallet.broadcast_txs();
    assert_eq!(broadcast.len(), 1);
    assert_eq!(broadcast[0].compute_txid(), staking_txid);
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToBtc);

    // the confirmation watch asks for depth + 1 confirmations
    let watch = h.notifier.watch_request(staking_txid).unwrap();
    assert_eq!(
        watch.num_confs,
        h.coordinator.params_ref().confirmation_depth as u32 + 1
    );

    confirm_staking(&h.notifier, &broadcast[0], 101);
    wait_for_state(&h.tracker, staking_txid, TxState::SentToCoordinator).await;

    let delegations = h.coordinator.delegations();
    assert_eq!(delegations.len(), 1);
    // the exact broadcast staking tx bytes reach the coordinator
    assert_eq!(delegations[0].staking_tx, broadcast[0]);
    // the coordinator reported a 500 sat slashing fee; the 1000 sat internal
    // floor is what the slashing tx actually pays
    assert_eq!(
        delegations[0].slashing_tx.output[0].value,
        Amount::from_sat(99_000)
    );

    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.btc_inclusion.unwrap().block_height, 101);

    // a re-delivered confirmation is ignored: no state change, no second
    // delegation, and the loop keeps serving requests
    let block = block_with(vec![broadcast[0].clone()]);
    h.app
        .inner()
        .channels
        .btc_confirmed
        .send(crate::events::StakingTxConfirmation {
            staking_txid,
            tx_index: 0,
            block_hash: block.block_hash(),
            block_height: 101,
            inclusion_block: Some(block),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToCoordinator);
    assert_eq!(h.coordinator.delegations().len(), 1);
    assert_eq!(h.app.stored_transactions(10, 0).await.unwrap().total, 1);

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn watched_registration_never_broadcasts() {
    let h = harness();
    h.app.start().await.unwrap();

    let (staking_tx, script_data, slashing_tx) = watched_staking_setup();
    let staking_txid = h
        .app
        .watch_staking(
            staking_tx.clone(),
            0,
            script_data,
            slashing_tx.clone(),
            test_signature(8),
            test_keypair(8).public_key(),
            test_address(8),
            test_pop(),
        )
        .await
        .unwrap();

    // watched transactions are tracked but never broadcast by us
    assert!(h.wallet.broadcast_txs().is_empty());
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert!(record.is_watched());

    confirm_staking(&h.notifier, &staking_tx, 102);
    wait_for_state(&h.tracker, staking_txid, TxState::SentToCoordinator).await;

    // the externally supplied slashing data is what reaches the coordinator
    let delegations = h.coordinator.delegations();
    assert_eq!(delegations[0].slashing_tx, slashing_tx);
    assert_eq!(
        delegations[0].staker_coordinator_pk,
        test_keypair(8).public_key()
    );

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unbond_collect_signatures_then_confirm() {
    let h = harness();
    h.app.start().await.unwrap();
    let staking_txid = stake_to_coordinator(&h).await;

    let unbonding_txid = h
        .app
        .unbond_staking(staking_txid, Some(Amount::from_sat(2_000)))
        .await
        .unwrap();

    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::UnbondingStarted);

    let undelegations = h.coordinator.undelegations();
    assert_eq!(undelegations.len(), 1);
    assert_eq!(undelegations[0].0, staking_txid);
    assert_eq!(
        undelegations[0].1.unbonding_tx.compute_txid(),
        unbonding_txid
    );

    // jury and validator signatures show up on the coordinator
    let (validator_sig, jury_sig) = dummy_sig_pair();
    h.coordinator.set_unbonding_sigs(
        staking_txid,
        UnbondingSignatures {
            validator_sig: Some(validator_sig),
            jury_sig: Some(jury_sig),
        },
    );
    wait_for_state(&h.tracker, staking_txid, TxState::UnbondingSignaturesReceived).await;

    // the engine broadcasts the unbonding tx with the full witness and
    // watches it for six confirmations
    h.notifier.wait_for_watch(unbonding_txid).await;
    let watch = h.notifier.watch_request(unbonding_txid).unwrap();
    assert_eq!(watch.num_confs, crate::UNBONDING_TX_CONFIRMATIONS);

    let broadcast = h.wallet.broadcast_txs();
    let unbonding_tx = broadcast
        .iter()
        .find(|tx| tx.compute_txid() == unbonding_txid)
        .expect("unbonding tx must be broadcast");
    // three signatures + leaf script + control block
    assert_eq!(unbonding_tx.input[0].witness.len(), 5);

    h.notifier.confirm(
        unbonding_txid,
        TxConfirmation {
            tx: unbonding_tx.clone(),
            tx_index: 0,
            block_hash: bitcoin::BlockHash::all_zeros(),
            block_height: 150,
            block: None,
        },
    );
    wait_for_state(&h.tracker, staking_txid, TxState::UnbondingConfirmedOnBtc).await;

    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    let unbonding = record.unbonding.unwrap();
    assert_eq!(unbonding.btc_inclusion.unwrap().block_height, 150);

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconciler_recovers_crash_between_undelegation_and_write() {
    let h = harness();

    // persisted state: delegation registered, no local unbonding record
    let script_data = default_script_data(1_000);
    let staking_tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![],
        output: vec![staking_output(&script_data, Amount::from_sat(100_000)).unwrap()],
    };
    let staking_txid = staking_tx.compute_txid();
    h.tracker
        .add_transaction(
            staking_tx.clone(),
            0,
            script_data,
            test_pop(),
            test_address(1).to_string(),
        )
        .await
        .unwrap();
    h.tracker
        .set_confirmed(&staking_txid, bitcoin::BlockHash::all_zeros(), 101)
        .await
        .unwrap();
    h.tracker.set_sent_to_coordinator(&staking_txid).await.unwrap();

    // the coordinator, however, already has the undelegation
    let undelegation = build_undelegation_data(
        &staking_tx,
        0,
        &script_data,
        100,
        Amount::from_sat(2_000),
        &test_keypair(1),
    )
    .unwrap();
    h.coordinator.set_delegation_info(
        staking_txid,
        DelegationDetails {
            undelegation: Some(UndelegationInfo {
                unbonding_tx: undelegation.unbonding_tx,
                script_data: undelegation.script_data,
            }),
        },
    );

    // startup reconciliation converges without any user request
    h.app.start().await.unwrap();
    wait_for_state(&h.tracker, staking_txid, TxState::UnbondingStarted).await;

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_in_steady_state_changes_nothing() {
    let h = harness();
    h.app.start().await.unwrap();
    let staking_txid = stake_to_coordinator(&h).await;
    h.app.stop().await;

    // a second daemon over the same store and coordinator
    let restarted = StakerApp::new(
        Network::Regtest,
        h.wallet.clone(),
        h.coordinator.clone(),
        h.notifier.clone(),
        Arc::new(StaticFeeEstimator::new(Amount::from_sat(2_000))),
        h.tracker.clone(),
    );
    restarted.start().await.unwrap();

    // the reconciler sees matching local and coordinator state: no new
    // submission, no state change
    tokio::time::sleep(Duration::from_secs(1)).await;
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToCoordinator);
    assert_eq!(h.coordinator.delegations().len(), 1);

    restarted.stop().await;
}

#[tokio::test(start_paused = true)]
async fn spend_confirmation_timeout_leaves_state_unchanged() {
    let h = harness();
    h.app.start().await.unwrap();
    let staking_txid = stake_to_coordinator(&h).await;

    let (spend_txid, value) = h.app.spend_stake(staking_txid).await.unwrap();
    // 2000 sat/kvB over the assumed 180 vB witness
    assert_eq!(value, Amount::from_sat(99_640));
    assert!(h.notifier.has_watch(spend_txid));

    // withhold confirmations past the two hour window
    tokio::time::sleep(crate::SPEND_CONFIRMATION_TIMEOUT + Duration::from_secs(60)).await;

    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToCoordinator);

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn spend_confirmation_marks_record_spent() {
    let h = harness();
    h.app.start().await.unwrap();
    let staking_txid = stake_to_coordinator(&h).await;

    let (spend_txid, _) = h.app.spend_stake(staking_txid).await.unwrap();
    let watch = h.notifier.watch_request(spend_txid).unwrap();
    assert_eq!(watch.num_confs, crate::SPEND_STAKE_TX_CONFIRMATIONS);

    let spend_tx = h
        .wallet
        .broadcast_txs()
        .iter()
        .find(|tx| tx.compute_txid() == spend_txid)
        .cloned()
        .unwrap();
    h.notifier.confirm(
        spend_txid,
        TxConfirmation {
            tx: spend_tx,
            tx_index: 0,
            block_hash: bitcoin::BlockHash::all_zeros(),
            block_height: 1_200,
            block: None,
        },
    );
    wait_for_state(&h.tracker, staking_txid, TxState::SpentOnBtc).await;

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unbond_of_watched_record_is_rejected() {
    let h = harness();
    h.app.start().await.unwrap();

    let (staking_tx, script_data, slashing_tx) = watched_staking_setup();
    let staking_txid = h
        .app
        .watch_staking(
            staking_tx.clone(),
            0,
            script_data,
            slashing_tx,
            test_signature(8),
            test_keypair(8).public_key(),
            test_address(8),
            test_pop(),
        )
        .await
        .unwrap();

    confirm_staking(&h.notifier, &staking_tx, 102);
    wait_for_state(&h.tracker, staking_txid, TxState::SentToCoordinator).await;

    let err = h.app.unbond_staking(staking_txid, None).await.unwrap_err();
    match err {
        EngineError::InvalidArgument(msg) => {
            assert_eq!(msg, "cannot unbond watched transaction")
        }
        other => panic!("unexpected error: {other}"),
    }

    // state unchanged, nothing registered
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToCoordinator);
    assert!(h.coordinator.undelegations().is_empty());

    h.app.stop().await;
}

#[tokio::test(start_paused = true)]
async fn staking_request_boundaries() {
    let h = harness();
    h.app.start().await.unwrap();

    // minimum staking time is 2 * 100 + 6 = 206 blocks
    let err = h
        .app
        .stake_funds(test_address(1), Amount::from_sat(100_000), xonly(2), 205)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Builder(staker_tx_builder::BuilderError::StakingTimeTooShort {
            got: 205,
            min: 206
        })
    ));

    // the effective slashing fee is floored at 1000 sats
    let err = h
        .app
        .stake_funds(test_address(1), Amount::from_sat(1_000), xonly(2), 1_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Builder(staker_tx_builder::BuilderError::StakingAmountTooLow { .. })
    ));

    // unknown validator
    let err = h
        .app
        .stake_funds(test_address(1), Amount::from_sat(100_000), xonly(7), 1_000)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    // fee rate boundary on unbonding: 999 sat/kvB fails, nothing persisted
    let staking_txid = stake_to_coordinator(&h).await;
    let err = h
        .app
        .unbond_staking(staking_txid, Some(Amount::from_sat(999)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Builder(staker_tx_builder::BuilderError::FeeRateTooLow { .. })
    ));
    let record = h.tracker.get_transaction(&staking_txid).await.unwrap();
    assert_eq!(record.state, TxState::SentToCoordinator);

    h.app.stop().await;
}
