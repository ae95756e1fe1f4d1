//! Bounded concurrency for backend calls.
//!
//! [`ConcurrencyGate`] is a counting semaphore handing out RAII
//! [`GatePermit`]s. A permit is returned when it is dropped, so success,
//! error and cancellation of the owning future all release it exactly once.
//! [`GatedBackend`] wraps any [`ChainBackend`] so that every call holds a
//! permit until the adapter has finished reading the response.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Script, Txid};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CoreError;
use crate::types::BlockHeight;

use super::types::{BlockMeta, ChainStatus, RichListEntry, TxMeta, UtxoEntry};
use super::ChainBackend;

/// Maximum number of in-flight requests against a node's REST interface.
pub const NODE_DEFAULT_CAPACITY: usize = 4;

// ==============================================================================
// ConcurrencyGate
// ==============================================================================

#[derive(Debug, Default)]
struct GateStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Shared counting semaphore with usage counters. Cloning yields another
/// handle to the same gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    stats: Arc<GateStats>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::InvalidInput(
                "concurrency gate capacity must be at least 1".to_owned(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(GateStats::default()),
            capacity,
        })
    }

    /// Wait for a free slot. The slot is held until the permit is dropped.
    pub async fn acquire(&self) -> GatePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);

        GatePermit {
            stats: Arc::clone(&self.stats),
            _permit: permit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> u64 {
        self.stats.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.stats.released.load(Ordering::SeqCst)
    }
}

/// A held slot of a [`ConcurrencyGate`].
#[derive(Debug)]
pub struct GatePermit {
    stats: Arc<GateStats>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        // Counters are updated before the semaphore slot is returned (fields
        // drop after this body), so `in_flight` never exceeds capacity.
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ==============================================================================
// GatedBackend
// ==============================================================================

/// Decorator routing every call of `B` through a [`ConcurrencyGate`].
pub struct GatedBackend<B> {
    inner: B,
    gate: ConcurrencyGate,
}

impl<B: ChainBackend> GatedBackend<B> {
    pub fn new(inner: B, gate: ConcurrencyGate) -> Self {
        Self { inner, gate }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: ChainBackend> ChainBackend for GatedBackend<B> {
    async fn fetch_tx_bytes(&self, txid: &Txid) -> Result<Vec<u8>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_tx_bytes(txid).await
    }

    async fn fetch_tx_meta(&self, txid: &Txid) -> Result<TxMeta, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_tx_meta(txid).await
    }

    async fn fetch_tx(&self, txid: &Txid) -> Result<(Vec<u8>, TxMeta), CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_tx(txid).await
    }

    async fn fetch_block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_block_bytes(hash).await
    }

    async fn fetch_block_meta(&self, hash: &BlockHash) -> Result<BlockMeta, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_block_meta(hash).await
    }

    async fn fetch_block_hash_at_height(&self, height: BlockHeight) -> Result<BlockHash, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_block_hash_at_height(height).await
    }

    async fn fetch_block_height(&self, hash: &BlockHash) -> Result<BlockHeight, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_block_height(hash).await
    }

    async fn fetch_chain_status(&self) -> Result<ChainStatus, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_chain_status().await
    }

    async fn fetch_address_index(&self, script: &Script) -> Result<Vec<Txid>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_address_index(script).await
    }

    async fn fetch_utxo_set(&self, script: &Script) -> Result<Vec<UtxoEntry>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_utxo_set(script).await
    }

    async fn fetch_rich_list_count(&self) -> Result<u64, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_rich_list_count().await
    }

    async fn fetch_rich_list_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<RichListEntry>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_rich_list_page(offset, limit).await
    }

    async fn fetch_rich_list_rank(&self, script: &Script) -> Result<Option<u64>, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.fetch_rich_list_rank(script).await
    }

    async fn broadcast_raw_transaction(&self, hex: &str) -> Result<Txid, CoreError> {
        let _permit = self.gate.acquire().await;
        self.inner.broadcast_raw_transaction(hex).await
    }
}
