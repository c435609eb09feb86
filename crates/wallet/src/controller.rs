//! The wallet trait consumed by the lifecycle engine.

use async_trait::async_trait;
use bitcoin::{
    secp256k1::SecretKey, Address, Amount, Block, BlockHash, OutPoint, ScriptBuf, Transaction,
    TxOut, Txid,
};
use thiserror::Error;

/// Errors from the wallet adapter.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The wallet RPC failed.
    #[error("wallet rpc: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),

    /// The wallet returned something we could not interpret.
    #[error("unexpected wallet response: {0}")]
    InvalidResponse(String),

    /// The blocking RPC task was cancelled or panicked.
    #[error("wallet task failed: {0}")]
    TaskFailed(String),
}

/// Wrapper type for wallet results.
pub type WalletResult<T> = Result<T, WalletError>;

/// Where a transaction currently sits relative to the chain.
#[derive(Debug, Clone)]
pub enum TxStatus {
    /// Unknown to both the mempool and the chain.
    NotFound,

    /// Accepted into the mempool, not yet mined.
    InMempool,

    /// Mined into a block.
    InChain(TxInclusionInfo),
}

/// Inclusion details for a mined transaction.
#[derive(Debug, Clone)]
pub struct TxInclusionInfo {
    /// Hash of the including block.
    pub block_hash: BlockHash,

    /// Height of the including block.
    pub block_height: u32,

    /// Position of the transaction within the block.
    pub tx_index: u32,

    /// The including block itself.
    pub block: Block,
}

/// An unspent wallet output.
#[derive(Debug, Clone)]
pub struct Utxo {
    /// The outpoint.
    pub outpoint: OutPoint,

    /// Value of the output.
    pub amount: Amount,

    /// Locking script of the output.
    pub script_pubkey: ScriptBuf,

    /// Confirmation count at the time of listing.
    pub confirmations: u32,
}

/// Private-key custody, transaction funding/signing/broadcast and chain
/// lookups, all behind the node wallet.
#[async_trait]
pub trait WalletController: Send + Sync {
    /// Unlocks the wallet for `timeout_secs` seconds. A no-op for wallets
    /// without a passphrase.
    async fn unlock_wallet(&self, timeout_secs: u64) -> WalletResult<()>;

    /// Dumps the private key controlling `address`. Requires an unlocked
    /// wallet.
    async fn dump_private_key(&self, address: &Address) -> WalletResult<SecretKey>;

    /// Builds, funds and signs a transaction paying `outputs`, with change
    /// going back to `change_address`. `fee_rate_per_kvb` is in sats per
    /// kilo-vbyte.
    async fn create_and_sign_tx(
        &self,
        outputs: Vec<TxOut>,
        fee_rate_per_kvb: Amount,
        change_address: &Address,
    ) -> WalletResult<Transaction>;

    /// Broadcasts a raw transaction.
    async fn send_raw_transaction(&self, tx: &Transaction) -> WalletResult<Txid>;

    /// Looks up where a transaction sits relative to the chain.
    async fn tx_details(&self, txid: &Txid, script_pubkey: &ScriptBuf) -> WalletResult<TxStatus>;

    /// Lists unspent wallet outputs.
    async fn list_outputs(&self, only_confirmed: bool) -> WalletResult<Vec<Utxo>>;
}
