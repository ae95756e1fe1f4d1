use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Script, Txid};

use crate::error::CoreError;
use crate::types::BlockHeight;

use super::types::{BlockMeta, ChainStatus, RichListEntry, TxMeta, UtxoEntry};
use super::ChainBackend;

/// Serves transactions, blocks, chain status and broadcasts from the node,
/// and address, UTXO and rich-list lookups from the index.
pub struct HybridBackend {
    node: Arc<dyn ChainBackend>,
    index: Arc<dyn ChainBackend>,
}

impl HybridBackend {
    pub fn new(node: Arc<dyn ChainBackend>, index: Arc<dyn ChainBackend>) -> Self {
        Self { node, index }
    }
}

#[async_trait]
impl ChainBackend for HybridBackend {
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        self.node.fetch_tx_bytes(txid).await
    }

    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError> {
        self.node.fetch_tx_meta(txid).await
    }

    async fn fetch_tx(&self, txid: &Txid) -> Result<(Vec<u8>, TxMeta), CoreError> {
        self.node.fetch_tx(txid).await
    }

    async fn fetch_block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        self.node.fetch_block_bytes(hash).await
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError> {
        self.node.fetch_block_meta(hash).await
    }

    async fn fetch_block_hash_at_height(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        self.node.fetch_block_hash_at_height(height).await
    }

    async fn fetch_block_height(&self, hash: &BlockHash) -> Result<BlockHeight, CoreError> {
        self.node.fetch_block_height(hash).await
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError> {
        self.node.fetch_chain_status().await
    }

    async fn fetch_address_index(&self, script: &Script) -> Result<Vec<Txid>, CoreError> {
        self.index.fetch_address_index(script).await
    }

    async fn fetch_utxo_set(&self, script: &Script) -> Result<Vec<UtxoEntry>, CoreError> {
        self.index.fetch_utxo_set(script).await
    }

    async fn fetch_rich_list_count(&self) -> Result<u64, CoreError> {
        self.index.fetch_rich_list_count().await
    }

    async fn fetch_rich_list_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RichListEntry>, CoreError> {
        self.index.fetch_rich_list_page(offset, limit).await
    }

    async fn fetch_rich_list_rank(&self, script: &Script) -> Result<Option<u64>, CoreError> {
        self.index.fetch_rich_list_rank(script).await
    }

    async fn broadcast_raw_transaction(&self, hex: &str) -> Result<Txid, CoreError> {
        self.node.broadcast_raw_transaction(hex).await
    }
}
