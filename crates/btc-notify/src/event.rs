//! Notification event payloads.

use bitcoin::{Block, BlockHash, Transaction};

/// A new chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEvent {
    /// Height of the new tip.
    pub height: u32,

    /// Hash of the new tip.
    pub hash: BlockHash,
}

/// A transaction that reached its requested confirmation depth.
#[derive(Debug, Clone)]
pub struct TxConfirmation {
    /// The confirmed transaction.
    pub tx: Transaction,

    /// Position of the transaction within its block.
    pub tx_index: u32,

    /// Hash of the including block.
    pub block_hash: BlockHash,

    /// Height of the including block.
    pub block_height: u32,

    /// The including block, when requested at registration time.
    pub block: Option<Block>,
}

/// Events emitted by a confirmation watch: progress updates followed by
/// exactly one confirmation (unless cancelled first).
#[derive(Debug, Clone)]
pub enum ConfNtfn {
    /// Confirmations still outstanding.
    Updates(u32),

    /// The transaction reached the requested depth.
    Confirmed(Box<TxConfirmation>),
}
