//! Block enrichment.
//!
//! Blocks are addressed by [`BlockId`]. A backend that serves raw blocks
//! gets its header and txids from the decoded block; one that cannot (the
//! index) supplies the serialized header and txid list in its metadata.

use std::str::FromStr;

use bitcoin::block::Header;
use bitcoin::{BlockHash, Network, Transaction, Txid};
use futures::future::try_join_all;
use tracing::debug;

use crate::backend::{BlockMeta, ChainBackend, TxMeta};
use crate::decode::{
    block_sizes, decode_block, decode_block_header, decode_transaction, decoded_from_transaction,
    encode_block_header, transaction_id,
};
use crate::enrich::enrich_decoded;
use crate::error::CoreError;
use crate::types::{BlockHeight, BlockSummary, EnrichedBlock, EnrichedBlockWithTxs};

// ==============================================================================
// Block Id
// ==============================================================================

/// A block reference as typed by a user: a decimal height or a 64-digit hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Height(BlockHeight),
    Hash(BlockHash),
}

/// `u32::MAX` has ten decimal digits.
const MAX_HEIGHT_DIGITS: usize = 10;

impl FromStr for BlockId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return s
                .parse::<BlockHash>()
                .map(Self::Hash)
                .map_err(|e| CoreError::InvalidInput(format!("block hash `{s}`: {e}")));
        }
        if (1..=MAX_HEIGHT_DIGITS).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .map(|h| Self::Height(BlockHeight(h)))
                .map_err(|e| CoreError::InvalidInput(format!("block height `{s}`: {e}")));
        }
        Err(CoreError::InvalidInput(format!(
            "`{s}` is neither a block height nor a 64-digit block hash"
        )))
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Height(height) => height.fmt(f),
            Self::Hash(hash) => hash.fmt(f),
        }
    }
}

// ==============================================================================
// Difficulty
// ==============================================================================

/// Difficulty relative to the minimum target (`bits = 0x1d00ffff`), for
/// display only. A zero mantissa yields `0.0`.
#[must_use]
pub fn difficulty(bits: u32) -> f64 {
    let exponent = (bits >> 24) as i32;
    let mantissa = bits & 0x00ff_ffff;
    if mantissa == 0 {
        return 0.0;
    }
    let scale = 2f64.powi(8 * (0x1d - exponent));
    scale * (f64::from(0xffff_u32) / f64::from(mantissa))
}

// ==============================================================================
// Fetching
// ==============================================================================

pub async fn fetch_block(
    backend: &dyn ChainBackend,
    id: BlockId,
) -> Result<EnrichedBlock, CoreError> {
    match id {
        BlockId::Height(height) => fetch_by_height(backend, height).await,
        BlockId::Hash(hash) => fetch_by_hash(backend, &hash).await,
    }
}

/// `NotFound` for heights above the current tip.
pub async fn fetch_by_height(
    backend: &dyn ChainBackend,
    height: BlockHeight,
) -> Result<EnrichedBlock, CoreError> {
    let hash = hash_at_height(backend, height).await?;
    fetch_by_hash(backend, &hash).await
}

pub async fn fetch_by_hash(
    backend: &dyn ChainBackend,
    hash: &BlockHash,
) -> Result<EnrichedBlock, CoreError> {
    Ok(load_block(backend, hash).await?.record)
}

/// The block plus every transaction in it, enriched concurrently and
/// returned in on-chain order.
pub async fn fetch_with_txs(
    backend: &dyn ChainBackend,
    network: Network,
    id: BlockId,
) -> Result<EnrichedBlockWithTxs, CoreError> {
    let hash = match id {
        BlockId::Height(height) => hash_at_height(backend, height).await?,
        BlockId::Hash(hash) => hash,
    };
    let LoadedBlock { record, txs } = load_block(backend, &hash).await?;
    let location = TxMeta {
        block_hash: Some(record.hash),
        block_height: Some(record.height),
    };

    let txs = match txs {
        Some(txs) => {
            try_join_all(txs.iter().map(|tx| {
                enrich_decoded(backend, network, decoded_from_transaction(tx), location)
            }))
            .await?
        }
        None => {
            try_join_all(record.txids.iter().map(|txid| async move {
                let bytes = backend.fetch_tx_bytes(txid).await?;
                enrich_decoded(backend, network, decode_transaction(&bytes)?, location).await
            }))
            .await?
        }
    };

    Ok(EnrichedBlockWithTxs { block: record, txs })
}

/// Summaries of up to `limit` consecutive blocks from `start` upwards,
/// fetched concurrently. The listing stops at the tip; a start above it
/// yields an empty list.
pub async fn fetch_summaries(
    backend: &dyn ChainBackend,
    start: BlockHeight,
    limit: u32,
) -> Result<Vec<BlockSummary>, CoreError> {
    let tip = backend.fetch_chain_status().await?.blocks;
    if start > tip {
        return Ok(Vec::new());
    }
    let end = start.0.saturating_add(limit).min(tip.0.saturating_add(1));

    try_join_all((start.0..end).map(|height| async move {
        let hash = backend.fetch_block_hash_at_height(BlockHeight(height)).await?;
        let record = fetch_by_hash(backend, &hash).await?;
        Ok::<_, CoreError>(BlockSummary::from(&record))
    }))
    .await
}

async fn hash_at_height(
    backend: &dyn ChainBackend,
    height: BlockHeight,
) -> Result<BlockHash, CoreError> {
    let status = backend.fetch_chain_status().await?;
    if height > status.blocks {
        return Err(CoreError::NotFound(format!(
            "block at height {height} (tip is {})",
            status.blocks
        )));
    }
    backend.fetch_block_hash_at_height(height).await
}

struct LoadedBlock {
    record: EnrichedBlock,
    /// Present when the backend served the whole block.
    txs: Option<Vec<Transaction>>,
}

async fn load_block(backend: &dyn ChainBackend, hash: &BlockHash) -> Result<LoadedBlock, CoreError> {
    let (bytes, meta) = futures::join!(
        backend.fetch_block_bytes(hash),
        backend.fetch_block_meta(hash),
    );
    let meta = meta?;

    match bytes {
        Ok(bytes) => {
            let block = decode_block(&bytes)?;
            check_hash(&block.header, hash)?;
            let (stripped_size, size, weight) = block_sizes(&block);
            let txids = block.txdata.iter().map(transaction_id).collect();
            let record = build_record(
                &block.header,
                &meta,
                Sizes {
                    size,
                    stripped_size,
                    weight,
                },
                txids,
            );
            Ok(LoadedBlock {
                record,
                txs: Some(block.txdata),
            })
        }
        Err(CoreError::Unsupported(_)) => {
            debug!(block.hash = %hash, "raw block unavailable; using backend header");
            let header_bytes = meta.header.as_deref().ok_or_else(|| {
                CoreError::MalformedData(format!(
                    "backend served neither raw bytes nor a header for block {hash}"
                ))
            })?;
            let header = decode_block_header(header_bytes)?;
            check_hash(&header, hash)?;
            let sizes = Sizes {
                size: meta.size,
                stripped_size: meta.stripped_size,
                weight: meta.weight,
            };
            let record = build_record(&header, &meta, sizes, meta.txids.clone());
            Ok(LoadedBlock { record, txs: None })
        }
        Err(err) => Err(err),
    }
}

fn check_hash(header: &Header, expected: &BlockHash) -> Result<(), CoreError> {
    let actual = header.block_hash();
    if actual != *expected {
        return Err(CoreError::MalformedData(format!(
            "backend returned block {actual} for {expected}"
        )));
    }
    Ok(())
}

struct Sizes {
    size: u64,
    stripped_size: u64,
    weight: u64,
}

fn build_record(header: &Header, meta: &BlockMeta, sizes: Sizes, txids: Vec<Txid>) -> EnrichedBlock {
    let bits = header.bits.to_consensus();
    EnrichedBlock {
        hash: header.block_hash(),
        height: meta.height,
        header: encode_block_header(header),
        version: header.version.to_consensus(),
        previous_block_hash: header.prev_blockhash,
        merkle_root: header.merkle_root,
        time: header.time,
        bits,
        nonce: header.nonce,
        difficulty: difficulty(bits),
        size: sizes.size,
        stripped_size: sizes.stripped_size,
        weight: sizes.weight,
        txids,
    }
}
