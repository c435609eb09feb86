//! Polling notifier backend over Bitcoin Core RPC.
//!
//! Each subscription runs its own task that polls the node at a fixed
//! interval and pushes events onto an unbounded channel, so slow consumers
//! never block the poller.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bitcoind_async_client::{traits::Reader, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    error::NotifyResult,
    event::{BlockEvent, ConfNtfn, TxConfirmation},
    notifier::{ChainNotifier, ConfirmationEvent, ConfirmationRequest},
    subscription::Subscription,
};

/// Default polling cadence against the Bitcoin node.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A [`ChainNotifier`] that polls a Bitcoin Core node.
#[derive(Clone)]
pub struct PollingNotifier {
    client: Arc<Client>,
    poll_interval: Duration,
    quit: CancellationToken,
}

impl PollingNotifier {
    /// Creates a notifier polling `client` at `poll_interval`.
    pub fn new(client: Arc<Client>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            quit: CancellationToken::new(),
        }
    }

    /// Stops all subscription tasks spawned by this notifier.
    pub fn shutdown(&self) {
        self.quit.cancel();
    }

    async fn current_tip(client: &Client) -> NotifyResult<BlockEvent> {
        let height = client.get_block_count().await?;
        let block = client.get_block_at(height).await?;
        Ok(BlockEvent {
            height: height as u32,
            hash: block.block_hash(),
        })
    }
}

#[async_trait]
impl ChainNotifier for PollingNotifier {
    async fn subscribe_blocks(&self) -> NotifyResult<Subscription<BlockEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();

        // deliver the current tip before handing out the subscription so the
        // first item is always the best block
        let mut last = Self::current_tip(&self.client).await?;
        let _ = sender.send(last);

        let client = self.client.clone();
        let interval = self.poll_interval;
        let quit = self.quit.child_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                match Self::current_tip(&client).await {
                    Ok(tip) if tip != last => {
                        trace!(height = %tip.height, hash = %tip.hash, "new chain tip");
                        last = tip;
                        if sender.send(tip).is_err() {
                            // subscriber gone
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(err = %e, "failed to poll chain tip"),
                }
            }
        });

        Ok(Subscription::from_receiver(receiver))
    }

    async fn register_confirmations(
        &self,
        request: ConfirmationRequest,
    ) -> NotifyResult<ConfirmationEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = self.quit.child_token();

        let client = self.client.clone();
        let interval = self.poll_interval;
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let txid = request.txid;
            let mut last_remaining = None;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!(%txid, "confirmation watch cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let info = match client.get_raw_transaction_verbosity_one(&txid).await {
                    Ok(info) => info,
                    Err(e) => {
                        // not found yet (or node hiccup), keep watching
                        trace!(%txid, err = %e, "watched tx not visible yet");
                        continue;
                    }
                };

                let confirmations = info.confirmations.unwrap_or(0) as u32;
                if confirmations < request.num_confs {
                    let remaining = request.num_confs - confirmations;
                    if last_remaining != Some(remaining) {
                        last_remaining = Some(remaining);
                        if sender.send(ConfNtfn::Updates(remaining)).is_err() {
                            return;
                        }
                    }
                    continue;
                }

                let Some(block_hash) = info.blockhash else {
                    // confirmed but no block hash reported; retry next tick
                    continue;
                };

                let block = match client.get_block(&block_hash).await {
                    Ok(block) => block,
                    Err(e) => {
                        warn!(%txid, err = %e, "failed to fetch inclusion block");
                        continue;
                    }
                };

                let block_height = block.bip34_block_height().unwrap_or_default() as u32;
                let Some(tx_index) = block
                    .txdata
                    .iter()
                    .position(|tx| tx.compute_txid() == txid)
                else {
                    warn!(%txid, %block_hash, "tx reported in block but not found in it");
                    continue;
                };

                let confirmation = TxConfirmation {
                    tx: block.txdata[tx_index].clone(),
                    tx_index: tx_index as u32,
                    block_hash,
                    block_height,
                    block: request.include_block.then_some(block),
                };

                debug!(%txid, %block_hash, %block_height, "confirmation watch resolved");
                let _ = sender.send(ConfNtfn::Confirmed(Box::new(confirmation)));
                return;
            }
        });

        Ok(ConfirmationEvent::new(
            Subscription::from_receiver(receiver),
            cancel,
        ))
    }
}
