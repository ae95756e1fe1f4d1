//! Adapter for the chain indexer's HTTP JSON interface.
//!
//! The index serves pre-resolved records: transactions and headers arrive as
//! hex inside JSON, and heights are reported directly. It also answers the
//! address-keyed queries a node cannot. Raw blocks and broadcasting are not
//! offered.

use async_trait::async_trait;
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::{BlockHash, Script, Txid};
use serde::Deserialize;

use crate::error::{BackendError, CoreError};
use crate::types::BlockHeight;

use super::http::{HttpTransport, TransportOptions};
use super::types::{BlockMeta, ChainStatus, RichListEntry, TxMeta, UtxoEntry};
use super::ChainBackend;

pub struct IndexBackend {
    transport: HttpTransport,
}

impl IndexBackend {
    pub fn new(base_url: &str, options: &TransportOptions) -> Result<Self, CoreError> {
        Ok(Self {
            transport: HttpTransport::new(base_url, options)?,
        })
    }

    async fn get_tx(&self, txid: &Txid) -> Result<IndexTx, CoreError> {
        self.transport.get_json(&format!("tx/{txid}")).await
    }

    async fn get_block(&self, id: &str) -> Result<IndexBlock, CoreError> {
        self.transport.get_json(&format!("block/{id}")).await
    }
}

// ==============================================================================
// Index response shapes
// ==============================================================================

/// The indexer reports the height only; `blockhash` is accepted when present.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexTx {
    hex: String,
    #[serde(alias = "confirmed_height")]
    confirmed_height: Option<u32>,
    #[serde(rename = "blockhash")]
    block_hash: Option<BlockHash>,
}

impl IndexTx {
    fn meta(&self) -> TxMeta {
        TxMeta {
            block_hash: self.block_hash,
            block_height: self.confirmed_height.map(BlockHeight),
        }
    }
}

#[derive(Deserialize)]
struct IndexBlock {
    hash: BlockHash,
    height: u32,
    header: String,
    size: u64,
    strippedsize: u64,
    weight: u64,
    #[serde(default)]
    txids: Vec<Txid>,
}

#[derive(Deserialize)]
struct IndexStatus {
    /// `-1` until the index has synced its first block.
    blocks: i64,
}

#[derive(Deserialize)]
struct IndexCount {
    count: u64,
}

#[derive(Deserialize)]
struct IndexRank {
    rank: Option<u64>,
}

fn hex_field(field: &str, hex: &str) -> Result<Vec<u8>, CoreError> {
    Vec::<u8>::from_hex(hex).map_err(|e| {
        BackendError::InvalidResponse(format!("index field `{field}` is not hex: {e}")).into()
    })
}

/// The index answers 404 for scripts it has never seen; that is an empty
/// history, not a missing resource.
fn empty_if_not_found<T>(result: Result<Vec<T>, CoreError>) -> Result<Vec<T>, CoreError> {
    match result {
        Err(CoreError::NotFound(_)) => Ok(Vec::new()),
        other => other,
    }
}

#[async_trait]
impl ChainBackend for IndexBackend {
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        let tx = self.get_tx(txid).await?;
        hex_field("hex", &tx.hex)
    }

    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError> {
        Ok(self.get_tx(txid).await?.meta())
    }

    async fn fetch_tx(&self, txid: &Txid) -> Result<(Vec<u8>, TxMeta), CoreError> {
        let tx = self.get_tx(txid).await?;
        Ok((hex_field("hex", &tx.hex)?, tx.meta()))
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError> {
        let block = self.get_block(&hash.to_string()).await?;
        Ok(BlockMeta {
            hash: block.hash,
            height: BlockHeight(block.height),
            size: block.size,
            stripped_size: block.strippedsize,
            weight: block.weight,
            header: Some(hex_field("header", &block.header)?),
            txids: block.txids,
        })
    }

    async fn fetch_block_hash_at_height(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        Ok(self.get_block(&height.to_string()).await?.hash)
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError> {
        let status: IndexStatus = self.transport.get_json("status").await?;
        let blocks = u32::try_from(status.blocks).map_err(|_| {
            BackendError::InvalidResponse(format!(
                "index reports tip height {}; it has not synced yet",
                status.blocks
            ))
        })?;
        Ok(ChainStatus {
            blocks: BlockHeight(blocks),
        })
    }

    async fn fetch_address_index(&self, script: &Script) -> Result<Vec<Txid>, CoreError> {
        let path = format!("addr_index/{}", script.as_bytes().to_lower_hex_string());
        empty_if_not_found(self.transport.get_json(&path).await)
    }

    async fn fetch_utxo_set(&self, script: &Script) -> Result<Vec<UtxoEntry>, CoreError> {
        let path = format!("utxo/{}", script.as_bytes().to_lower_hex_string());
        empty_if_not_found(self.transport.get_json(&path).await)
    }

    async fn fetch_rich_list_count(&self) -> Result<u64, CoreError> {
        let count: IndexCount = self.transport.get_json("rich_list/count").await?;
        Ok(count.count)
    }

    async fn fetch_rich_list_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RichListEntry>, CoreError> {
        self.transport
            .get_json(&format!("rich_list/{offset}/{limit}"))
            .await
    }

    async fn fetch_rich_list_rank(&self, script: &Script) -> Result<Option<u64>, CoreError> {
        let path = format!("rich_list_addr_rank/{}", script.as_bytes().to_lower_hex_string());
        match self.transport.get_json::<IndexRank>(&path).await {
            Ok(rank) => Ok(rank.rank),
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
