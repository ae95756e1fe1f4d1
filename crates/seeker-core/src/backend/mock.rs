use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize;
use bitcoin::hex::FromHex;
use bitcoin::{Block, BlockHash, Script, ScriptBuf, Transaction, Txid};

use crate::decode::{block_sizes, decode_transaction, encode_block_header};
use crate::error::{BackendError, CoreError};
use crate::types::BlockHeight;

use super::types::{BlockMeta, ChainStatus, RichListEntry, TxMeta, UtxoEntry};
use super::ChainBackend;

/// A mock chain backend for testing. Serves canned transactions, blocks and
/// index records populated via the builder pattern.
pub struct MockBackend {
    txs: HashMap<Txid, (Vec<u8>, TxMeta)>,
    failing: HashSet<Txid>,
    blocks: HashMap<BlockHash, (Vec<u8>, BlockMeta)>,
    heights: BTreeMap<u32, BlockHash>,
    raw_blocks: bool,
    address_index: HashMap<ScriptBuf, Vec<Txid>>,
    utxos: HashMap<ScriptBuf, Vec<UtxoEntry>>,
    rich_list: Option<Vec<RichListEntry>>,
    delay: Option<Duration>,
    tx_fetches: Mutex<HashMap<Txid, usize>>,
}

impl MockBackend {
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder {
            backend: MockBackend {
                txs: HashMap::new(),
                failing: HashSet::new(),
                blocks: HashMap::new(),
                heights: BTreeMap::new(),
                raw_blocks: true,
                address_index: HashMap::new(),
                utxos: HashMap::new(),
                rich_list: None,
                delay: None,
                tx_fetches: Mutex::new(HashMap::new()),
            },
        }
    }

    /// How many times `fetch_tx_bytes` was called for `txid`.
    pub fn tx_fetch_count(&self, txid: &Txid) -> usize {
        self.tx_fetches
            .lock()
            .expect("mock counter lock poisoned")
            .get(txid)
            .copied()
            .unwrap_or(0)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn tx_entry(&self, txid: &Txid) -> Result<&(Vec<u8>, TxMeta), CoreError> {
        if self.failing.contains(txid) {
            return Err(BackendError::Status {
                status: 503,
                url: format!("mock://tx/{txid}"),
            }
            .into());
        }
        self.txs
            .get(txid)
            .ok_or_else(|| CoreError::NotFound(format!("tx/{txid}")))
    }

    fn block_entry(&self, hash: &BlockHash) -> Result<&(Vec<u8>, BlockMeta), CoreError> {
        self.blocks
            .get(hash)
            .ok_or_else(|| CoreError::NotFound(format!("block/{hash}")))
    }
}

pub struct MockBackendBuilder {
    backend: MockBackend,
}

impl MockBackendBuilder {
    /// An unconfirmed transaction.
    pub fn with_tx(self, tx: Transaction) -> Self {
        self.with_tx_meta(tx, TxMeta::default())
    }

    /// A transaction confirmed in `block_hash`; its height is resolved via
    /// the block, like a node does.
    pub fn with_confirmed_tx(self, tx: Transaction, block_hash: BlockHash) -> Self {
        self.with_tx_meta(
            tx,
            TxMeta {
                block_hash: Some(block_hash),
                block_height: None,
            },
        )
    }

    pub fn with_tx_meta(mut self, tx: Transaction, meta: TxMeta) -> Self {
        self.backend
            .txs
            .insert(tx.compute_txid(), (serialize(&tx), meta));
        self
    }

    /// Serve arbitrary bytes for `txid`, e.g. to simulate corrupt data.
    pub fn with_raw_tx(mut self, txid: Txid, bytes: Vec<u8>) -> Self {
        self.backend.txs.insert(txid, (bytes, TxMeta::default()));
        self
    }

    /// Fetches of `txid` fail with a 503.
    pub fn with_failing_tx(mut self, txid: Txid) -> Self {
        self.backend.failing.insert(txid);
        self
    }

    /// Register a block at `height` along with all of its transactions.
    pub fn with_block(mut self, block: &Block, height: u32) -> Self {
        let hash = block.block_hash();
        let (stripped_size, size, weight) = block_sizes(block);
        let meta = BlockMeta {
            hash,
            height: BlockHeight(height),
            size,
            stripped_size,
            weight,
            header: Some(encode_block_header(&block.header)),
            txids: block.txdata.iter().map(Transaction::compute_txid).collect(),
        };
        self.backend.blocks.insert(hash, (serialize(block), meta));
        self.backend.heights.insert(height, hash);
        for tx in &block.txdata {
            self = self.with_confirmed_tx(tx.clone(), hash);
        }
        self
    }

    /// Behave like an index: no raw block bytes, header and txids in the
    /// block metadata instead.
    pub fn without_raw_blocks(mut self) -> Self {
        self.backend.raw_blocks = false;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.backend.delay = Some(delay);
        self
    }

    pub fn with_address_index(mut self, script: ScriptBuf, txids: Vec<Txid>) -> Self {
        self.backend.address_index.insert(script, txids);
        self
    }

    pub fn with_utxos(mut self, script: ScriptBuf, utxos: Vec<UtxoEntry>) -> Self {
        self.backend.utxos.insert(script, utxos);
        self
    }

    /// Entries must already be sorted by descending value.
    pub fn with_rich_list(mut self, entries: Vec<RichListEntry>) -> Self {
        self.backend.rich_list = Some(entries);
        self
    }

    pub fn build(self) -> MockBackend {
        self.backend
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        *self
            .tx_fetches
            .lock()
            .expect("mock counter lock poisoned")
            .entry(*txid)
            .or_default() += 1;
        self.pause().await;
        self.tx_entry(txid).map(|(bytes, _)| bytes.clone())
    }

    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError> {
        self.pause().await;
        self.tx_entry(txid).map(|(_, meta)| *meta)
    }

    async fn fetch_block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        self.pause().await;
        if !self.raw_blocks {
            return Err(CoreError::Unsupported("raw block bytes"));
        }
        self.block_entry(hash).map(|(bytes, _)| bytes.clone())
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError> {
        self.pause().await;
        let (_, meta) = self.block_entry(hash)?;
        let mut meta = meta.clone();
        if self.raw_blocks {
            meta.header = None;
        }
        Ok(meta)
    }

    async fn fetch_block_hash_at_height(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        self.pause().await;
        self.heights
            .get(&height.0)
            .copied()
            .ok_or_else(|| CoreError::NotFound(format!("blockhashbyheight/{height}")))
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError> {
        self.pause().await;
        let tip = self.heights.keys().next_back().copied().unwrap_or(0);
        Ok(ChainStatus {
            blocks: BlockHeight(tip),
        })
    }

    async fn fetch_address_index(&self, script: &Script) -> Result<Vec<Txid>, CoreError> {
        self.pause().await;
        Ok(self
            .address_index
            .get(script)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_utxo_set(&self, script: &Script) -> Result<Vec<UtxoEntry>, CoreError> {
        self.pause().await;
        Ok(self.utxos.get(script).cloned().unwrap_or_default())
    }

    async fn fetch_rich_list_count(&self) -> Result<u64, CoreError> {
        self.pause().await;
        self.rich_list
            .as_ref()
            .map(|entries| entries.len() as u64)
            .ok_or(CoreError::Unsupported("rich list"))
    }

    async fn fetch_rich_list_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RichListEntry>, CoreError> {
        self.pause().await;
        let entries = self
            .rich_list
            .as_ref()
            .ok_or(CoreError::Unsupported("rich list"))?;
        Ok(entries
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_rich_list_rank(&self, script: &Script) -> Result<Option<u64>, CoreError> {
        self.pause().await;
        let entries = self
            .rich_list
            .as_ref()
            .ok_or(CoreError::Unsupported("rich list"))?;
        Ok(entries
            .iter()
            .position(|entry| entry.script_pubkey.as_script() == script)
            .map(|index| index as u64 + 1))
    }

    async fn broadcast_raw_transaction(&self, hex: &str) -> Result<Txid, CoreError> {
        self.pause().await;
        let bytes = Vec::<u8>::from_hex(hex)
            .map_err(|e| CoreError::InvalidInput(format!("broadcast hex: {e}")))?;
        Ok(decode_transaction(&bytes)?.txid)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;

    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn with_block_registers_transactions_and_height() {
        let coinbase = coinbase_tx(1, 50_000);
        let block = make_block(BlockHash::all_zeros(), vec![coinbase.clone()]);
        let backend = MockBackend::builder().with_block(&block, 7).build();

        let hash = backend
            .fetch_block_hash_at_height(BlockHeight(7))
            .await
            .expect("height registered");
        assert_eq!(hash, block.block_hash());
        assert_eq!(
            backend.fetch_chain_status().await.expect("status").blocks,
            BlockHeight(7)
        );

        let meta = backend
            .fetch_tx_meta(&coinbase.compute_txid())
            .await
            .expect("tx registered");
        assert_eq!(meta.block_hash, Some(hash));
        assert_eq!(
            backend.fetch_block_height(&hash).await.expect("height"),
            BlockHeight(7)
        );
    }

    #[tokio::test]
    async fn without_raw_blocks_serves_header_in_meta() {
        let block = make_block(BlockHash::all_zeros(), vec![coinbase_tx(1, 50_000)]);
        let backend = MockBackend::builder()
            .with_block(&block, 1)
            .without_raw_blocks()
            .build();
        let hash = block.block_hash();

        assert!(matches!(
            backend.fetch_block_bytes(&hash).await,
            Err(CoreError::Unsupported(_))
        ));
        let meta = backend.fetch_block_meta(&hash).await.expect("meta");
        assert_eq!(meta.header.map(|h| h.len()), Some(80));
        assert_eq!(meta.txids.len(), 1);
    }

    #[tokio::test]
    async fn failing_tx_reports_backend_unavailable() {
        let txid = txid_from_byte(4);
        let backend = MockBackend::builder().with_failing_tx(txid).build();
        let err = backend.fetch_tx_bytes(&txid).await.expect_err("must fail");
        assert!(matches!(err, CoreError::BackendUnavailable(_)));
        assert_eq!(backend.tx_fetch_count(&txid), 1);
    }
}
