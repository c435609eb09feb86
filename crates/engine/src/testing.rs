//! In-memory collaborators for engine tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    secp256k1::{schnorr, Keypair, Message, PublicKey, Secp256k1, SecretKey},
    transaction::Version,
    Address, Amount, Block, CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness, XOnlyPublicKey,
};
use staker_btc_notify::{
    BlockEvent, ChainNotifier, ConfNtfn, ConfirmationEvent, ConfirmationRequest, NotifyResult,
    Subscription, TxConfirmation,
};
use staker_coordinator::{
    CoordinatorClient, CoordinatorError, CoordinatorParams, CoordinatorResult, DelegationDetails,
    Keyring, UnbondingSignatures, UndelegationInfo, ValidatorsResponse,
};
use staker_primitives::{DelegationData, ProofOfPossession, StakingScriptData, UndelegationData};
use staker_wallet::{TxStatus, Utxo, WalletController, WalletError, WalletResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) fn test_keypair(byte: u8) -> Keypair {
    let secp = Secp256k1::new();
    Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
}

pub(crate) fn xonly(byte: u8) -> XOnlyPublicKey {
    XOnlyPublicKey::from_keypair(&test_keypair(byte)).0
}

pub(crate) fn test_address(byte: u8) -> Address {
    let secp = Secp256k1::new();
    Address::p2tr(&secp, xonly(byte), None, Network::Regtest)
}

pub(crate) fn test_signature(byte: u8) -> schnorr::Signature {
    let secp = Secp256k1::new();
    secp.sign_schnorr(&Message::from_digest([byte; 32]), &test_keypair(byte))
}

pub(crate) fn test_pop() -> ProofOfPossession {
    ProofOfPossession {
        coordinator_sig: vec![0xbb; 64],
        btc_sig: test_signature(1),
    }
}

/// A block containing exactly the given transactions, good enough for
/// inclusion proofs.
pub(crate) fn block_with(txs: Vec<Transaction>) -> Block {
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

struct RegisteredWatch {
    request: ConfirmationRequest,
    sender: mpsc::UnboundedSender<ConfNtfn>,
}

/// A notifier the test drives by hand.
#[derive(Default)]
pub(crate) struct MockNotifier {
    tip_height: AtomicU32,
    block_senders: Mutex<Vec<mpsc::UnboundedSender<BlockEvent>>>,
    watches: Mutex<Vec<RegisteredWatch>>,
}

impl MockNotifier {
    pub(crate) fn new(tip_height: u32) -> Self {
        let notifier = Self::default();
        notifier.tip_height.store(tip_height, Ordering::SeqCst);
        notifier
    }

    fn tip(&self) -> BlockEvent {
        BlockEvent {
            height: self.tip_height.load(Ordering::SeqCst),
            hash: bitcoin::BlockHash::all_zeros(),
        }
    }

    /// Delivers a confirmation to the watch registered for `txid`.
    pub(crate) fn confirm(&self, txid: Txid, conf: TxConfirmation) {
        let watches = self.watches.lock().unwrap();
        let watch = watches
            .iter()
            .rev()
            .find(|w| w.request.txid == txid)
            .unwrap_or_else(|| panic!("no confirmation watch registered for {txid}"));
        let _ = watch.sender.send(ConfNtfn::Confirmed(Box::new(conf)));
    }

    pub(crate) fn has_watch(&self, txid: Txid) -> bool {
        self.watches
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.request.txid == txid)
    }

    pub(crate) fn watch_request(&self, txid: Txid) -> Option<ConfirmationRequest> {
        self.watches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| w.request.txid == txid)
            .map(|w| w.request.clone())
    }

    /// Polls until a watch for `txid` exists.
    pub(crate) async fn wait_for_watch(&self, txid: Txid) {
        while !self.has_watch(txid) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ChainNotifier for MockNotifier {
    async fn subscribe_blocks(&self) -> NotifyResult<Subscription<BlockEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(self.tip());
        self.block_senders.lock().unwrap().push(sender);
        Ok(Subscription::from_receiver(receiver))
    }

    async fn register_confirmations(
        &self,
        request: ConfirmationRequest,
    ) -> NotifyResult<ConfirmationEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.watches
            .lock()
            .unwrap()
            .push(RegisteredWatch { request, sender });
        Ok(ConfirmationEvent::new(
            Subscription::from_receiver(receiver),
            CancellationToken::new(),
        ))
    }
}

/// A wallet with a few known keys that records every broadcast.
#[derive(Default)]
pub(crate) struct MockWallet {
    keys: Mutex<HashMap<String, SecretKey>>,
    broadcast: Mutex<Vec<Transaction>>,
    tx_status: Mutex<HashMap<Txid, TxStatus>>,
    funding_counter: AtomicU32,
}

impl MockWallet {
    pub(crate) fn with_key(address: &Address, key_byte: u8) -> Self {
        let wallet = Self::default();
        wallet.keys.lock().unwrap().insert(
            address.to_string(),
            SecretKey::from_slice(&[key_byte; 32]).unwrap(),
        );
        wallet
    }

    pub(crate) fn broadcast_txs(&self) -> Vec<Transaction> {
        self.broadcast.lock().unwrap().clone()
    }

    pub(crate) fn set_tx_status(&self, txid: Txid, status: TxStatus) {
        self.tx_status.lock().unwrap().insert(txid, status);
    }
}

#[async_trait]
impl WalletController for MockWallet {
    async fn unlock_wallet(&self, _timeout_secs: u64) -> WalletResult<()> {
        Ok(())
    }

    async fn dump_private_key(&self, address: &Address) -> WalletResult<SecretKey> {
        self.keys
            .lock()
            .unwrap()
            .get(&address.to_string())
            .copied()
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!("no key for address {address}"))
            })
    }

    async fn create_and_sign_tx(
        &self,
        outputs: Vec<TxOut>,
        _fee_rate_per_kvb: Amount,
        _change_address: &Address,
    ) -> WalletResult<Transaction> {
        let salt = self.funding_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::all_zeros(),
                    vout: salt,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: outputs,
        })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> WalletResult<Txid> {
        self.broadcast.lock().unwrap().push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn tx_details(&self, txid: &Txid, _script_pubkey: &ScriptBuf) -> WalletResult<TxStatus> {
        Ok(self
            .tx_status
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .unwrap_or(TxStatus::NotFound))
    }

    async fn list_outputs(&self, _only_confirmed: bool) -> WalletResult<Vec<Utxo>> {
        Ok(vec![])
    }
}

/// A coordinator holding everything in memory.
pub(crate) struct MockCoordinator {
    params: CoordinatorParams,
    keyring: Keyring,
    validators: Mutex<HashSet<XOnlyPublicKey>>,
    delegations: Mutex<Vec<DelegationData>>,
    undelegations: Mutex<Vec<(Txid, UndelegationData)>>,
    delegation_info: Mutex<HashMap<Txid, DelegationDetails>>,
    unbonding_sigs: Mutex<HashMap<Txid, UnbondingSignatures>>,
}

impl MockCoordinator {
    /// Jury key is test key 3; the reported slashing fee of 500 sats is below
    /// the internal floor on purpose.
    pub(crate) fn new() -> Self {
        Self {
            params: CoordinatorParams {
                jury_key: xonly(3),
                slashing_address: test_address(9).to_string(),
                min_slashing_fee: Amount::from_sat(500),
                confirmation_depth: 6,
                finalization_timeout: 100,
            },
            keyring: Keyring::from_secret_key(SecretKey::from_slice(&[77u8; 32]).unwrap()),
            validators: Mutex::new(HashSet::from([xonly(2)])),
            delegations: Mutex::new(Vec::new()),
            undelegations: Mutex::new(Vec::new()),
            delegation_info: Mutex::new(HashMap::new()),
            unbonding_sigs: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn params_ref(&self) -> &CoordinatorParams {
        &self.params
    }

    pub(crate) fn delegations(&self) -> Vec<DelegationData> {
        self.delegations.lock().unwrap().clone()
    }

    pub(crate) fn undelegations(&self) -> Vec<(Txid, UndelegationData)> {
        self.undelegations.lock().unwrap().clone()
    }

    pub(crate) fn set_unbonding_sigs(&self, staking_txid: Txid, sigs: UnbondingSignatures) {
        self.unbonding_sigs.lock().unwrap().insert(staking_txid, sigs);
    }

    /// Pretends an undelegation was registered before a crash.
    pub(crate) fn set_delegation_info(&self, staking_txid: Txid, info: DelegationDetails) {
        self.delegation_info.lock().unwrap().insert(staking_txid, info);
    }
}

#[async_trait]
impl CoordinatorClient for MockCoordinator {
    async fn params(&self) -> CoordinatorResult<CoordinatorParams> {
        Ok(self.params.clone())
    }

    async fn sign(&self, payload: &[u8]) -> CoordinatorResult<Vec<u8>> {
        Ok(self.keyring.sign(payload))
    }

    fn pub_key(&self) -> PublicKey {
        self.keyring.public_key()
    }

    async fn validator_exists(&self, validator_key: &XOnlyPublicKey) -> CoordinatorResult<bool> {
        Ok(self.validators.lock().unwrap().contains(validator_key))
    }

    async fn is_tx_already_part_of_delegation(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<bool> {
        Ok(self.delegation_info.lock().unwrap().contains_key(staking_txid))
    }

    async fn submit_delegation(&self, delegation: DelegationData) -> CoordinatorResult<()> {
        let staking_txid = delegation.staking_tx.compute_txid();
        self.delegations.lock().unwrap().push(delegation);
        self.delegation_info
            .lock()
            .unwrap()
            .entry(staking_txid)
            .or_insert(DelegationDetails { undelegation: None });
        Ok(())
    }

    async fn query_delegation_info(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<DelegationDetails> {
        self.delegation_info
            .lock()
            .unwrap()
            .get(staking_txid)
            .cloned()
            .ok_or(CoordinatorError::DelegationNotFound(*staking_txid))
    }

    async fn submit_undelegation(
        &self,
        staking_txid: &Txid,
        undelegation: UndelegationData,
    ) -> CoordinatorResult<()> {
        self.undelegations
            .lock()
            .unwrap()
            .push((*staking_txid, undelegation.clone()));
        self.delegation_info.lock().unwrap().insert(
            *staking_txid,
            DelegationDetails {
                undelegation: Some(UndelegationInfo {
                    unbonding_tx: undelegation.unbonding_tx,
                    script_data: undelegation.script_data,
                }),
            },
        );
        Ok(())
    }

    async fn query_unbonding_signatures(
        &self,
        staking_txid: &Txid,
    ) -> CoordinatorResult<UnbondingSignatures> {
        Ok(self
            .unbonding_sigs
            .lock()
            .unwrap()
            .get(staking_txid)
            .copied()
            .unwrap_or(UnbondingSignatures {
                validator_sig: None,
                jury_sig: None,
            }))
    }

    async fn query_validators(
        &self,
        _limit: u64,
        _offset: u64,
    ) -> CoordinatorResult<ValidatorsResponse> {
        Ok(ValidatorsResponse {
            validators: vec![],
            total: 0,
        })
    }
}

/// `sign_schnorr` over an arbitrary digest, used where tests need any valid
/// signature bytes.
pub(crate) fn dummy_sig_pair() -> (schnorr::Signature, schnorr::Signature) {
    (test_signature(2), test_signature(3))
}

/// Exposes the script data a staking flow would commit to with the default
/// mock coordinator (staker key 1, validator key 2, jury key 3).
pub(crate) fn default_script_data(lock_time: u16) -> StakingScriptData {
    StakingScriptData::new(xonly(1), xonly(2), xonly(3), lock_time).unwrap()
}
