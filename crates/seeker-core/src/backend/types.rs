//! Records returned by [`ChainBackend`](super::ChainBackend) lookups.
//!
//! These are the raw facts an adapter can report. The enrichment engines
//! combine them with decoded bytes to build the API-ready records in
//! `crate::types`.

use bitcoin::{BlockHash, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::types::BlockHeight;

// ==============================================================================
// Chain Status
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Height of the current tip.
    pub blocks: BlockHeight,
}

// ==============================================================================
// Transaction / Block Metadata
// ==============================================================================

/// Where a transaction sits in the chain. Both fields are `None` for
/// mempool transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxMeta {
    pub block_hash: Option<BlockHash>,
    /// Set when the backend reports the height directly, which saves the
    /// dependent block-height lookup.
    pub block_height: Option<BlockHeight>,
}

/// Backend-reported facts about a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub hash: BlockHash,
    pub height: BlockHeight,
    pub size: u64,
    pub stripped_size: u64,
    pub weight: u64,
    /// Serialized 80-byte header, for backends that cannot serve raw blocks.
    pub header: Option<Vec<u8>>,
    /// Transaction ids in on-chain order. May be empty when the backend
    /// serves raw blocks instead.
    pub txids: Vec<Txid>,
}

// ==============================================================================
// Index Records
// ==============================================================================

/// An unspent output as reported by the address index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UtxoEntry {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

/// One line of the rich list: a script and the total value it holds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RichListEntry {
    pub script_pubkey: ScriptBuf,
    pub value: u64,
}
