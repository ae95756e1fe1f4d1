//! Chain data backend abstraction layer.
//!
//! Defines the [`ChainBackend`] trait and its adapters: [`NodeBackend`]
//! (a full node's REST interface), [`IndexBackend`] (the chain indexer's
//! JSON interface), [`HybridBackend`] (both, split by capability) and the
//! [`GatedBackend`] decorator that bounds in-flight calls. A test mock lives
//! in `mock::MockBackend`.

pub mod gate;
mod http;
pub mod hybrid;
pub mod index;
#[cfg(test)]
pub mod mock;
pub mod node;
mod protocol;
pub mod types;

pub use gate::{ConcurrencyGate, GatePermit, GatedBackend, NODE_DEFAULT_CAPACITY};
pub use http::{RpcAuth, TransportOptions};
pub use hybrid::HybridBackend;
pub use index::IndexBackend;
pub use node::NodeBackend;
pub use types::{BlockMeta, ChainStatus, RichListEntry, TxMeta, UtxoEntry};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Script, Txid};
use tracing::info;

use crate::error::CoreError;
use crate::types::BlockHeight;

/// The chain lookups the enrichment engines need.
///
/// Every method maps backend absence to [`CoreError::NotFound`] and
/// transport trouble to [`CoreError::BackendUnavailable`]. Capabilities an
/// adapter cannot answer keep the default body and return
/// [`CoreError::Unsupported`].
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Consensus-serialized transaction.
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError>;

    /// Containing block of a transaction, if confirmed.
    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError>;

    /// Bytes and location together. Adapters that get both from one
    /// response override this to save the second request.
    async fn fetch_tx(&self, txid: &Txid) -> Result<(Vec<u8>, TxMeta), CoreError> {
        let bytes = self.fetch_tx_bytes(txid).await?;
        let meta = self.fetch_tx_meta(txid).await?;
        Ok((bytes, meta))
    }

    /// Consensus-serialized block.
    async fn fetch_block_bytes(&self, _hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::Unsupported("raw block bytes"))
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError>;

    async fn fetch_block_hash_at_height(&self, height: BlockHeight)
        -> Result<BlockHash, CoreError>;

    /// Height of a known block. Adapters with a cheaper lookup override this.
    async fn fetch_block_height(&self, hash: &BlockHash) -> Result<BlockHeight, CoreError> {
        Ok(self.fetch_block_meta(hash).await?.height)
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError>;

    /// Txids of every transaction touching `script`.
    async fn fetch_address_index(&self, _script: &Script) -> Result<Vec<Txid>, CoreError> {
        Err(CoreError::Unsupported("address index"))
    }

    /// Unspent outputs locked by `script`.
    async fn fetch_utxo_set(&self, _script: &Script) -> Result<Vec<UtxoEntry>, CoreError> {
        Err(CoreError::Unsupported("utxo set"))
    }

    async fn fetch_rich_list_count(&self) -> Result<u64, CoreError> {
        Err(CoreError::Unsupported("rich list"))
    }

    /// A page of scripts ordered by descending balance.
    async fn fetch_rich_list_page(
        &self,
        _offset: u64,
        _limit: u64,
    ) -> Result<Vec<RichListEntry>, CoreError> {
        Err(CoreError::Unsupported("rich list"))
    }

    /// 1-based position of `script` in the rich list, `None` when it holds
    /// nothing.
    async fn fetch_rich_list_rank(&self, _script: &Script) -> Result<Option<u64>, CoreError> {
        Err(CoreError::Unsupported("rich list"))
    }

    /// Relay a hex-encoded, already-signed transaction.
    async fn broadcast_raw_transaction(&self, _hex: &str) -> Result<Txid, CoreError> {
        Err(CoreError::Unsupported("broadcast"))
    }
}

// ==============================================================================
// Backend Selection
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Node,
    Index,
    /// Node for transactions and blocks, index for address-keyed lookups.
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub node_rest_url: Option<String>,
    pub rpc_url: Option<String>,
    pub rpc_user: Option<String>,
    pub rpc_pass: Option<String>,
    pub rpc_cookie_file: Option<PathBuf>,
    pub index_url: Option<String>,
    /// In-flight limit for node calls.
    pub node_concurrency: usize,
    /// In-flight limit for index calls; `None` leaves the index ungated.
    pub index_concurrency: Option<usize>,
    pub transport: TransportOptions,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            node_rest_url: None,
            rpc_url: None,
            rpc_user: None,
            rpc_pass: None,
            rpc_cookie_file: None,
            index_url: None,
            node_concurrency: NODE_DEFAULT_CAPACITY,
            index_concurrency: None,
            transport: TransportOptions::default(),
        }
    }
}

/// Build the adapter stack described by `config`. The node adapter is
/// always wrapped in a [`GatedBackend`].
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ChainBackend>, CoreError> {
    match config.kind {
        BackendKind::Node => build_node(config),
        BackendKind::Index => build_index(config),
        BackendKind::Hybrid => Ok(Arc::new(HybridBackend::new(
            build_node(config)?,
            build_index(config)?,
        ))),
    }
}

fn build_node(config: &BackendConfig) -> Result<Arc<dyn ChainBackend>, CoreError> {
    let url = config.node_rest_url.as_deref().ok_or_else(|| {
        CoreError::InvalidInput(format!(
            "{:?} backend needs a node REST url",
            config.kind
        ))
    })?;
    let mut node = NodeBackend::new(url, &config.transport)?;
    if let Some(rpc_url) = config.rpc_url.as_deref() {
        let auth = RpcAuth::from_options(
            config.rpc_user.as_deref(),
            config.rpc_pass.as_deref(),
            config.rpc_cookie_file.as_deref(),
        )?;
        node = node.with_rpc(rpc_url, auth)?;
    }
    let gate = ConcurrencyGate::new(config.node_concurrency)?;
    info!(url, capacity = gate.capacity(), broadcast = config.rpc_url.is_some(), "node backend ready");
    Ok(Arc::new(GatedBackend::new(node, gate)))
}

fn build_index(config: &BackendConfig) -> Result<Arc<dyn ChainBackend>, CoreError> {
    let url = config.index_url.as_deref().ok_or_else(|| {
        CoreError::InvalidInput(format!("{:?} backend needs an index url", config.kind))
    })?;
    let index = IndexBackend::new(url, &config.transport)?;
    match config.index_concurrency {
        Some(capacity) => {
            let gate = ConcurrencyGate::new(capacity)?;
            info!(url, capacity, "index backend ready");
            Ok(Arc::new(GatedBackend::new(index, gate)))
        }
        None => {
            info!(url, "index backend ready");
            Ok(Arc::new(index))
        }
    }
}
