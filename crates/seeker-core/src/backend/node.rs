//! Adapter for a full node's REST interface.
//!
//! Raw transactions and blocks come from the `.bin` endpoints, metadata from
//! the `.json` ones. Broadcasting goes through the node's JSON-RPC endpoint
//! when one is configured. The node keeps no address index, so address, UTXO
//! and rich-list lookups are unsupported.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use bitcoin::consensus::encode::deserialize;
use bitcoin::{BlockHash, Txid};
use lru::LruCache;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{BackendError, CoreError};
use crate::types::BlockHeight;

use super::http::{HttpTransport, RpcAuth, RpcEndpoint, TransportOptions};
use super::protocol::normalize_broadcast_error;
use super::types::{BlockMeta, ChainStatus, TxMeta};
use super::ChainBackend;

/// Maximum number of block-hash → height entries cached in memory.
const BLOCK_HEIGHT_CACHE_CAP: usize = 10_000;

pub struct NodeBackend {
    transport: HttpTransport,
    rpc: Option<RpcEndpoint>,
    /// Confirmed block heights are immutable, so entries never need
    /// invalidation, only eviction.
    block_height_cache: RwLock<LruCache<BlockHash, BlockHeight>>,
}

impl NodeBackend {
    /// `rest_url` is the REST root, e.g. `http://127.0.0.1:8332/rest`.
    pub fn new(rest_url: &str, options: &TransportOptions) -> Result<Self, CoreError> {
        Ok(Self {
            transport: HttpTransport::new(rest_url, options)?,
            rpc: None,
            block_height_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(BLOCK_HEIGHT_CACHE_CAP)
                    .expect("BLOCK_HEIGHT_CACHE_CAP is non-zero"),
            )),
        })
    }

    /// Enable broadcasting through the node's JSON-RPC endpoint.
    pub fn with_rpc(mut self, rpc_url: &str, auth: RpcAuth) -> Result<Self, CoreError> {
        self.rpc = Some(RpcEndpoint::new(rpc_url, auth)?);
        Ok(self)
    }

    async fn cached_height(&self, hash: &BlockHash) -> Option<BlockHeight> {
        // `LruCache::get` updates recency, hence the write lock.
        self.block_height_cache.write().await.get(hash).copied()
    }

    async fn remember_height(&self, hash: BlockHash, height: BlockHeight) {
        self.block_height_cache.write().await.put(hash, height);
    }
}

// ==============================================================================
// REST response shapes
// ==============================================================================

#[derive(Deserialize)]
struct RestTx {
    blockhash: Option<BlockHash>,
}

#[derive(Deserialize)]
struct RestBlock {
    hash: BlockHash,
    height: u32,
    size: u64,
    strippedsize: u64,
    weight: u64,
    #[serde(default)]
    tx: Vec<Txid>,
}

#[derive(Deserialize)]
struct RestChainInfo {
    blocks: u32,
}

fn parse_block_hash_bytes(bytes: &[u8]) -> Result<BlockHash, CoreError> {
    deserialize(bytes).map_err(|e| {
        BackendError::InvalidResponse(format!(
            "block hash must be 32 bytes, got {} ({e})",
            bytes.len()
        ))
        .into()
    })
}

#[async_trait]
impl ChainBackend for NodeBackend {
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        self.transport.get_bytes(&format!("tx/{txid}.bin")).await
    }

    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError> {
        let tx: RestTx = self.transport.get_json(&format!("tx/{txid}.json")).await?;
        Ok(TxMeta {
            block_hash: tx.blockhash,
            block_height: None,
        })
    }

    async fn fetch_block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        self.transport.get_bytes(&format!("block/{hash}.bin")).await
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError> {
        let block: RestBlock = self
            .transport
            .get_json(&format!("block/notxdetails/{hash}.json"))
            .await?;
        let height = BlockHeight(block.height);
        self.remember_height(block.hash, height).await;

        Ok(BlockMeta {
            hash: block.hash,
            height,
            size: block.size,
            stripped_size: block.strippedsize,
            weight: block.weight,
            header: None,
            txids: block.tx,
        })
    }

    async fn fetch_block_hash_at_height(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        let bytes = self
            .transport
            .get_bytes(&format!("blockhashbyheight/{height}.bin"))
            .await?;
        parse_block_hash_bytes(&bytes)
    }

    async fn fetch_block_height(&self, hash: &BlockHash) -> Result<BlockHeight, CoreError> {
        if let Some(height) = self.cached_height(hash).await {
            debug!(block.hash = %hash, block.height = %height, "block height cache hit");
            return Ok(height);
        }
        Ok(self.fetch_block_meta(hash).await?.height)
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError> {
        let info: RestChainInfo = self.transport.get_json("chaininfo.json").await?;
        Ok(ChainStatus {
            blocks: BlockHeight(info.blocks),
        })
    }

    async fn broadcast_raw_transaction(&self, hex: &str) -> Result<Txid, CoreError> {
        let Some(rpc) = &self.rpc else {
            return Err(CoreError::Unsupported("broadcast without an rpc endpoint"));
        };
        let result = self
            .transport
            .rpc_call(rpc, "sendrawtransaction", vec![serde_json::json!(hex)])
            .await
            .map_err(normalize_broadcast_error)?;

        let txid = result.as_str().ok_or_else(|| {
            BackendError::InvalidResponse(format!("sendrawtransaction returned {result}"))
        })?;
        txid.parse().map_err(|e| {
            BackendError::InvalidResponse(format!("invalid txid `{txid}` from node: {e}")).into()
        })
    }
}
