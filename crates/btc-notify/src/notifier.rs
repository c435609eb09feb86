//! The notifier trait consumed by the lifecycle engine.

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};
use tokio_util::sync::CancellationToken;

use crate::{
    error::NotifyResult,
    event::{BlockEvent, ConfNtfn},
    subscription::Subscription,
};

/// Parameters of a confirmation watch.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// The transaction to watch.
    pub txid: Txid,

    /// Script of the watched output, for backends that index by script.
    pub script_pubkey: ScriptBuf,

    /// Confirmations required before the watch fires.
    pub num_confs: u32,

    /// Height to start looking from.
    pub height_hint: u32,

    /// Whether to deliver the full including block with the confirmation.
    pub include_block: bool,
}

/// A registered confirmation watch: a stream of [`ConfNtfn`] events plus an
/// idempotent cancel handle. Dropping the event without cancelling leaves the
/// backend task running until the watch resolves, so cancel on early exit.
#[derive(Debug)]
pub struct ConfirmationEvent {
    /// Update and confirmation notifications.
    pub events: Subscription<ConfNtfn>,

    cancel: CancellationToken,
}

impl ConfirmationEvent {
    /// Pairs a notification stream with its cancellation token.
    pub fn new(events: Subscription<ConfNtfn>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Cancels the watch. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Subscriptions to Bitcoin chain events.
#[async_trait]
pub trait ChainNotifier: Send + Sync {
    /// Subscribes to new chain tips. The first item delivered is the current
    /// tip.
    async fn subscribe_blocks(&self) -> NotifyResult<Subscription<BlockEvent>>;

    /// Registers an N-confirmation watch for a transaction.
    async fn register_confirmations(
        &self,
        request: ConfirmationRequest,
    ) -> NotifyResult<ConfirmationEvent>;
}
