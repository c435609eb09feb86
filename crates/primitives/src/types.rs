//! Small shared value types.

use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

/// A reference to a confirmed position on the Bitcoin chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Hash of the block that includes the transaction.
    pub block_hash: BlockHash,

    /// Height of that block.
    pub block_height: u32,
}
