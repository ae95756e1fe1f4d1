//! The operations exposed to callers: one method per lookup, each taking
//! user-facing identifiers (addresses, txids, block ids) and returning
//! serializable records.

use std::sync::Arc;

use bitcoin::hex::FromHex;
use bitcoin::{Network, ScriptBuf, Txid};
use futures::future::try_join_all;
use tracing::info;

use crate::backend::{ChainBackend, ChainStatus};
use crate::block::{self, BlockId};
use crate::decode::decode_transaction;
use crate::enrich::enrich_transaction;
use crate::error::CoreError;
use crate::script::{classify_script, resolve_address, script_for_address_or_hex};
use crate::types::{
    AddressBalanceEntry, AddressBalancePage, BlockHeight, BlockSummary, EnrichedBlock,
    EnrichedBlockWithTxs, EnrichedTransaction, Utxo,
};

/// Parse a display-order txid typed by a user.
pub fn parse_txid(s: &str) -> Result<Txid, CoreError> {
    let s = s.trim();
    s.parse()
        .map_err(|e| CoreError::InvalidInput(format!("invalid txid `{s}`: {e}")))
}

#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn ChainBackend>,
    network: Network,
}

impl Gateway {
    pub fn new(backend: Arc<dyn ChainBackend>, network: Network) -> Self {
        Self { backend, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub async fn get_status(&self) -> Result<ChainStatus, CoreError> {
        self.backend.fetch_chain_status().await
    }

    pub async fn get_transaction(&self, txid: &Txid) -> Result<EnrichedTransaction, CoreError> {
        enrich_transaction(self.backend.as_ref(), self.network, txid).await
    }

    pub async fn get_block(&self, id: BlockId) -> Result<EnrichedBlock, CoreError> {
        block::fetch_block(self.backend.as_ref(), id).await
    }

    pub async fn get_block_with_txs(&self, id: BlockId) -> Result<EnrichedBlockWithTxs, CoreError> {
        block::fetch_with_txs(self.backend.as_ref(), self.network, id).await
    }

    /// Up to `limit` block summaries starting at height `start`, cut short
    /// at the tip.
    pub async fn get_block_summaries(
        &self,
        start: BlockHeight,
        limit: u32,
    ) -> Result<Vec<BlockSummary>, CoreError> {
        if limit == 0 {
            return Err(CoreError::InvalidInput("page limit must be positive".to_owned()));
        }
        block::fetch_summaries(self.backend.as_ref(), start, limit).await
    }

    // Address-keyed lookups take an address or a script in hex.

    /// Every transaction that pays to or spends from `address`.
    pub async fn get_address_txids(&self, address: &str) -> Result<Vec<Txid>, CoreError> {
        let script = self.script(address)?;
        self.backend.fetch_address_index(&script).await
    }

    /// Same as [`Gateway::get_address_txids`], each transaction enriched.
    /// Fails as a whole if any of them cannot be enriched.
    pub async fn get_address_txs(
        &self,
        address: &str,
    ) -> Result<Vec<EnrichedTransaction>, CoreError> {
        let txids = self.get_address_txids(address).await?;
        try_join_all(
            txids
                .iter()
                .map(|txid| enrich_transaction(self.backend.as_ref(), self.network, txid)),
        )
        .await
    }

    /// 1-based rank of `address` in the balance ranking; `None` when it
    /// holds nothing.
    pub async fn get_address_rank(&self, address: &str) -> Result<Option<u64>, CoreError> {
        let script = self.script(address)?;
        self.backend.fetch_rich_list_rank(&script).await
    }

    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, CoreError> {
        let script = self.script(address)?;
        let entries = self.backend.fetch_utxo_set(&script).await?;
        let script_type = classify_script(&script);
        let rendered = resolve_address(&script, self.network);

        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                txid: entry.txid,
                vout: entry.vout,
                value: entry.value,
                script_pubkey: script.clone(),
                script_type,
                address: rendered.clone(),
            })
            .collect())
    }

    /// One page of the balance ranking. Asking for an empty page, or for
    /// one that starts past the end, is an error rather than an empty list.
    pub async fn get_address_balances_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<AddressBalancePage, CoreError> {
        if limit == 0 {
            return Err(CoreError::InvalidInput("page limit must be positive".to_owned()));
        }
        let count = self.backend.fetch_rich_list_count().await?;
        if offset >= count {
            return Err(CoreError::OutOfRange { offset, count });
        }

        let entries = self
            .backend
            .fetch_rich_list_page(offset, limit)
            .await?
            .into_iter()
            .map(|entry| AddressBalanceEntry {
                address: resolve_address(&entry.script_pubkey, self.network),
                script_pubkey: entry.script_pubkey,
                value: entry.value,
            })
            .collect();

        Ok(AddressBalancePage { count, entries })
    }

    /// Relay a signed transaction. The hex must decode to a transaction
    /// before it is handed to the backend; it is never enriched.
    pub async fn broadcast_raw_transaction(&self, hex: &str) -> Result<Txid, CoreError> {
        let hex = hex.trim();
        let bytes = Vec::<u8>::from_hex(hex)
            .map_err(|e| CoreError::InvalidInput(format!("transaction hex: {e}")))?;
        let decoded = decode_transaction(&bytes)
            .map_err(|e| CoreError::InvalidInput(format!("not a transaction: {e}")))?;

        let txid = self.backend.broadcast_raw_transaction(hex).await?;
        info!(txid = %txid, local_txid = %decoded.txid, "broadcast transaction");
        Ok(txid)
    }

    fn script(&self, address: &str) -> Result<ScriptBuf, CoreError> {
        script_for_address_or_hex(address, self.network)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::encode::serialize_hex;
    use bitcoin::hashes::Hash;
    use bitcoin::BlockHash;

    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{RichListEntry, UtxoEntry};
    use crate::test_util::*;
    use crate::types::{BlockHeight, ScriptType};

    fn gateway(backend: MockBackend) -> Gateway {
        Gateway::new(Arc::new(backend), Network::Regtest)
    }

    fn address_of(tag: u8) -> String {
        resolve_address(&p2wpkh_script(tag), Network::Regtest).expect("p2wpkh has an address")
    }

    #[tokio::test]
    async fn block_with_txs_carries_per_transaction_fees() {
        let funding_a = make_tx(vec![(txid_from_byte(1), 0)], vec![(5_000, p2wpkh_script(1))]);
        let funding_b = make_tx(vec![(txid_from_byte(2), 0)], vec![(3_000, p2pkh_script(2))]);
        let spend = make_tx(
            vec![(funding_a.compute_txid(), 0), (funding_b.compute_txid(), 0)],
            vec![(7_900, p2wpkh_script(3)), (90, p2wpkh_script(4))],
        );
        let other = make_tx(vec![(funding_a.compute_txid(), 1)], vec![(1, p2wpkh_script(5))]);
        let block = make_block(
            BlockHash::all_zeros(),
            vec![coinbase_tx(9, 50_000), spend.clone(), other],
        );
        let backend = MockBackend::builder()
            .with_tx(funding_a)
            .with_tx(funding_b)
            .with_block(&block, 12)
            .build();

        let full = gateway(backend)
            .get_block_with_txs(BlockId::Height(BlockHeight(12)))
            .await
            .expect("block must enrich");

        assert_eq!(full.block.height, BlockHeight(12));
        assert_eq!(full.txs.len(), 3);
        assert_eq!(full.txs[1].txid, spend.compute_txid());
        assert_eq!(full.txs[1].fee, 10);
        assert!(full.txs[1].fee_is_complete());
        assert_eq!(full.txs[1].inputs[0].address, Some(address_of(1)));

        // Spends a vout the funding transaction does not have.
        assert!(!full.txs[2].fee_is_complete());
        assert!(full.txs[0].is_coinbase());
    }

    #[tokio::test]
    async fn get_transaction_reports_confirmation() {
        let tx = make_tx(vec![(txid_from_byte(1), 0)], vec![(10, p2wpkh_script(1))]);
        let txid = tx.compute_txid();
        let block = make_block(BlockHash::all_zeros(), vec![coinbase_tx(1, 50_000), tx]);
        let gw = gateway(MockBackend::builder().with_block(&block, 3).build());

        let enriched = gw.get_transaction(&txid).await.expect("tx");
        assert_eq!(enriched.confirmed_height, Some(BlockHeight(3)));
        assert_eq!(enriched.block_hash, Some(block.block_hash()));
    }

    #[test]
    fn parse_txid_rejects_garbage() {
        assert!(matches!(parse_txid("xyz"), Err(CoreError::InvalidInput(_))));
        let txid = txid_from_byte(5);
        assert_eq!(parse_txid(&format!(" {txid} ")).expect("valid"), txid);
    }

    #[tokio::test]
    async fn address_txids_use_the_address_script() {
        let txid = txid_from_byte(6);
        let gw = gateway(
            MockBackend::builder()
                .with_address_index(p2wpkh_script(1), vec![txid])
                .build(),
        );
        assert_eq!(
            gw.get_address_txids(&address_of(1)).await.expect("txids"),
            vec![txid]
        );
        assert!(gw
            .get_address_txids(&address_of(2))
            .await
            .expect("unknown address")
            .is_empty());
    }

    #[tokio::test]
    async fn script_hex_works_wherever_an_address_does() {
        let txid = txid_from_byte(6);
        let gw = gateway(
            MockBackend::builder()
                .with_address_index(p2wpkh_script(1), vec![txid])
                .build(),
        );
        let hex = p2wpkh_script(1).to_hex_string();
        assert_eq!(gw.get_address_txids(&hex).await.expect("txids"), vec![txid]);
    }

    #[tokio::test]
    async fn address_txs_are_enriched_in_index_order() {
        let funding = make_tx(vec![(txid_from_byte(1), 0)], vec![(5_000, p2wpkh_script(1))]);
        let spend = make_tx(
            vec![(funding.compute_txid(), 0)],
            vec![(4_990, p2wpkh_script(2))],
        );
        let history = vec![funding.compute_txid(), spend.compute_txid()];
        let gw = gateway(
            MockBackend::builder()
                .with_tx(funding)
                .with_tx(spend)
                .with_address_index(p2wpkh_script(1), history.clone())
                .build(),
        );

        let txs = gw.get_address_txs(&address_of(1)).await.expect("txs");
        assert_eq!(txs.iter().map(|tx| tx.txid).collect::<Vec<_>>(), history);
        assert_eq!(txs[1].fee, 10);
        assert_eq!(txs[1].inputs[0].address, Some(address_of(1)));
    }

    #[tokio::test]
    async fn address_txs_fail_when_a_listed_tx_is_missing() {
        let gw = gateway(
            MockBackend::builder()
                .with_address_index(p2wpkh_script(1), vec![txid_from_byte(0x77)])
                .build(),
        );
        let err = gw.get_address_txs(&address_of(1)).await.expect_err("missing tx");
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn block_summaries_page_from_start_height() {
        let mut builder = MockBackend::builder();
        let mut prev = BlockHash::all_zeros();
        for height in 0..3u32 {
            let block = make_block(prev, vec![coinbase_tx(height as u8, 50_000)]);
            prev = block.block_hash();
            builder = builder.with_block(&block, height);
        }
        let gw = gateway(builder.build());

        let page = gw
            .get_block_summaries(BlockHeight(1), 5)
            .await
            .expect("summaries");
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].hash, prev);
        assert!(page.iter().all(|summary| summary.tx_count == 1));
        assert!(matches!(
            gw.get_block_summaries(BlockHeight(0), 0).await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn invalid_address_is_rejected_before_any_lookup() {
        let gw = gateway(MockBackend::builder().build());
        let err = gw.get_utxos("not-an-address").await.expect_err("invalid");
        assert!(err.is_client_error());
        let mainnet = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";
        assert!(matches!(
            gw.get_address_txids(mainnet).await,
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn utxos_are_annotated_with_script_and_address() {
        let entries = vec![
            UtxoEntry {
                txid: txid_from_byte(7),
                vout: 1,
                value: 4_200,
            },
            UtxoEntry {
                txid: txid_from_byte(8),
                vout: 0,
                value: 10,
            },
        ];
        let gw = gateway(
            MockBackend::builder()
                .with_utxos(p2wpkh_script(1), entries)
                .build(),
        );

        let utxos = gw.get_utxos(&address_of(1)).await.expect("utxos");
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].value, 4_200);
        assert_eq!(utxos[0].vout, 1);
        assert!(utxos.iter().all(|u| u.script_type == ScriptType::P2wpkh));
        assert!(utxos.iter().all(|u| u.script_pubkey == p2wpkh_script(1)));
        assert!(utxos
            .iter()
            .all(|u| u.address == Some(address_of(1))));
    }

    fn rich_list_gateway(len: u8) -> Gateway {
        let entries = (0..len)
            .map(|i| RichListEntry {
                script_pubkey: p2wpkh_script(i),
                value: 1_000 - u64::from(i),
            })
            .collect();
        gateway(MockBackend::builder().with_rich_list(entries).build())
    }

    #[tokio::test]
    async fn balance_page_returns_requested_slice() {
        let page = rich_list_gateway(5)
            .get_address_balances_page(1, 2)
            .await
            .expect("page");
        assert_eq!(page.count, 5);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].value, 999);
        assert_eq!(page.entries[0].address, Some(address_of(1)));
        assert_eq!(page.entries[1].value, 998);
    }

    #[tokio::test]
    async fn balance_page_tail_is_short() {
        let page = rich_list_gateway(5)
            .get_address_balances_page(4, 10)
            .await
            .expect("last page");
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn balance_page_rejects_bad_bounds() {
        let gw = rich_list_gateway(5);
        assert!(matches!(
            gw.get_address_balances_page(0, 0).await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            gw.get_address_balances_page(5, 1).await,
            Err(CoreError::OutOfRange { offset: 5, count: 5 })
        ));
    }

    #[tokio::test]
    async fn address_rank_is_one_based() {
        let gw = rich_list_gateway(5);
        assert_eq!(gw.get_address_rank(&address_of(0)).await.expect("rank"), Some(1));
        assert_eq!(gw.get_address_rank(&address_of(3)).await.expect("rank"), Some(4));
        assert_eq!(gw.get_address_rank(&address_of(9)).await.expect("rank"), None);
    }

    #[tokio::test]
    async fn balance_page_without_index_is_unsupported() {
        let err = gateway(MockBackend::builder().build())
            .get_address_balances_page(0, 1)
            .await
            .expect_err("no rich list");
        assert!(matches!(err, CoreError::Unsupported(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn broadcast_validates_hex_before_relaying() {
        let gw = gateway(MockBackend::builder().build());
        assert!(matches!(
            gw.broadcast_raw_transaction("zz").await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            gw.broadcast_raw_transaction("deadbeef").await,
            Err(CoreError::InvalidInput(_))
        ));

        let tx = make_tx(vec![(txid_from_byte(1), 0)], vec![(10, p2wpkh_script(1))]);
        let txid = gw
            .broadcast_raw_transaction(&serialize_hex(&tx))
            .await
            .expect("valid transaction");
        assert_eq!(txid, tx.compute_txid());
    }
}
