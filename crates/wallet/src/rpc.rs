//! Bitcoin Core RPC implementation of [`WalletController`].

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{
    consensus,
    secp256k1::SecretKey,
    Address, Amount, Network, OutPoint, ScriptBuf, Transaction, TxOut, Txid,
};
use bitcoincore_rpc::{
    json::FundRawTransactionOptions,
    jsonrpc,
    Auth, Client, RpcApi,
};
use serde_json::json;
use tracing::trace;

use crate::controller::{
    TxInclusionInfo, TxStatus, Utxo, WalletController, WalletError, WalletResult,
};

/// RPC error code Bitcoin Core returns for an unknown transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// A [`WalletController`] over a Bitcoin Core wallet.
///
/// The underlying client is blocking, so every call is pushed onto the
/// blocking thread pool.
#[derive(Clone)]
pub struct RpcWallet {
    client: Arc<Client>,
    network: Network,
    passphrase: Option<String>,
}

impl RpcWallet {
    /// Connects to the wallet RPC endpoint.
    pub fn connect(
        url: &str,
        user: String,
        pass: String,
        network: Network,
        passphrase: Option<String>,
    ) -> WalletResult<Self> {
        let client = Client::new(url, Auth::UserPass(user, pass))?;
        Ok(Self {
            client: Arc::new(client),
            network,
            passphrase,
        })
    }

    /// The network this wallet operates on.
    pub fn network(&self) -> Network {
        self.network
    }

    async fn blocking<T, F>(&self, f: F) -> WalletResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, bitcoincore_rpc::Error> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| WalletError::TaskFailed(e.to_string()))?
            .map_err(WalletError::from)
    }
}

fn is_not_found(err: &bitcoincore_rpc::Error) -> bool {
    matches!(
        err,
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(rpc))
            if rpc.code == RPC_INVALID_ADDRESS_OR_KEY
    )
}

#[async_trait]
impl WalletController for RpcWallet {
    async fn unlock_wallet(&self, timeout_secs: u64) -> WalletResult<()> {
        let Some(passphrase) = self.passphrase.clone() else {
            return Ok(());
        };

        self.blocking(move |client| {
            client
                .call::<serde_json::Value>(
                    "walletpassphrase",
                    &[json!(passphrase), json!(timeout_secs)],
                )
                .map(|_| ())
        })
        .await
    }

    async fn dump_private_key(&self, address: &Address) -> WalletResult<SecretKey> {
        let address = address.clone();
        self.blocking(move |client| client.dump_private_key(&address))
            .await
            .map(|pk| pk.inner)
    }

    async fn create_and_sign_tx(
        &self,
        outputs: Vec<TxOut>,
        fee_rate_per_kvb: Amount,
        change_address: &Address,
    ) -> WalletResult<Transaction> {
        let change_address = change_address.clone();
        let unsigned = Transaction {
            version: bitcoin::transaction::Version(2),
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: outputs,
        };

        self.blocking(move |client| {
            let options = FundRawTransactionOptions {
                change_address: Some(change_address),
                // the wallet interprets feeRate per kvB
                fee_rate: Some(fee_rate_per_kvb),
                ..Default::default()
            };
            let funded = client.fund_raw_transaction(&unsigned, Some(&options), None)?;
            let signed =
                client.sign_raw_transaction_with_wallet(funded.hex.as_slice(), None, None)?;
            Ok(signed)
        })
        .await
        .and_then(|signed| {
            if !signed.complete {
                return Err(WalletError::InvalidResponse(
                    "wallet could not fully sign the funding transaction".to_string(),
                ));
            }
            consensus::deserialize(&signed.hex)
                .map_err(|e| WalletError::InvalidResponse(e.to_string()))
        })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> WalletResult<Txid> {
        let tx = tx.clone();
        self.blocking(move |client| client.send_raw_transaction(&tx))
            .await
    }

    async fn tx_details(&self, txid: &Txid, _script_pubkey: &ScriptBuf) -> WalletResult<TxStatus> {
        let txid = *txid;
        let info = self
            .blocking(move |client| client.get_raw_transaction_info(&txid, None))
            .await;

        let info = match info {
            Ok(info) => info,
            Err(WalletError::Rpc(e)) if is_not_found(&e) => {
                trace!(%txid, "tx not found in mempool or chain");
                return Ok(TxStatus::NotFound);
            }
            Err(e) => return Err(e),
        };

        let Some(block_hash) = info.blockhash else {
            return Ok(TxStatus::InMempool);
        };

        let (block, height) = self
            .blocking(move |client| {
                let block = client.get_block(&block_hash)?;
                let header = client.get_block_header_info(&block_hash)?;
                Ok((block, header.height))
            })
            .await?;

        let tx_index = block
            .txdata
            .iter()
            .position(|tx| tx.compute_txid() == txid)
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!(
                    "tx {txid} reported in block {block_hash} but absent from it"
                ))
            })? as u32;

        Ok(TxStatus::InChain(TxInclusionInfo {
            block_hash,
            block_height: height as u32,
            tx_index,
            block,
        }))
    }

    async fn list_outputs(&self, only_confirmed: bool) -> WalletResult<Vec<Utxo>> {
        let min_conf: usize = if only_confirmed { 1 } else { 0 };
        let entries = self
            .blocking(move |client| client.list_unspent(Some(min_conf), None, None, None, None))
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                outpoint: OutPoint {
                    txid: entry.txid,
                    vout: entry.vout,
                },
                amount: entry.amount,
                script_pubkey: entry.script_pub_key,
                confirmations: entry.confirmations,
            })
            .collect())
    }
}
