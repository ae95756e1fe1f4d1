//! Binary decoding of transactions, block headers and blocks.
//!
//! Parsing is delegated to the `bitcoin` crate's consensus codec; this module
//! maps its output onto Seeker's record types and turns every structural
//! violation into [`CoreError::MalformedData`].

use bitcoin::block::Header;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{Block, BlockHash, Transaction, Txid, Wtxid};

use crate::error::CoreError;
use crate::types::{DecodedTransaction, TxInput, TxOutput};

/// Serialized size of a block header.
pub const HEADER_SIZE: usize = 80;

/// Witness bytes count once, every other byte counts four times.
const WITNESS_SCALE_FACTOR: u64 = 4;

/// Decode a consensus-serialized transaction. The input must contain exactly
/// one transaction and nothing else.
pub fn decode_transaction(bytes: &[u8]) -> Result<DecodedTransaction, CoreError> {
    let tx: Transaction = deserialize(bytes)
        .map_err(|e| CoreError::MalformedData(format!("transaction: {e}")))?;
    Ok(to_decoded(&tx, bytes.to_vec()))
}

/// Map an already-parsed transaction (e.g. one taken from a decoded block)
/// onto a [`DecodedTransaction`].
pub fn decoded_from_transaction(tx: &Transaction) -> DecodedTransaction {
    to_decoded(tx, serialize(tx))
}

/// Decode the 80-byte header at the start of `bytes`. Anything after the
/// header (such as the rest of a serialized block) is ignored.
pub fn decode_block_header(bytes: &[u8]) -> Result<Header, CoreError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CoreError::MalformedData(format!(
            "block header needs {HEADER_SIZE} bytes, got {}",
            bytes.len()
        )));
    }
    deserialize(&bytes[..HEADER_SIZE])
        .map_err(|e| CoreError::MalformedData(format!("block header: {e}")))
}

pub fn encode_block_header(header: &Header) -> Vec<u8> {
    serialize(header)
}

/// Decode a full consensus-serialized block.
pub fn decode_block(bytes: &[u8]) -> Result<Block, CoreError> {
    deserialize(bytes).map_err(|e| CoreError::MalformedData(format!("block: {e}")))
}

/// Double-SHA256 of the non-witness serialization. `Txid` displays
/// byte-reversed.
pub fn transaction_id(tx: &Transaction) -> Txid {
    tx.compute_txid()
}

/// Same as [`transaction_id`] but over the full serialization, witness
/// included. Equals the txid for transactions without witness data.
pub fn witness_transaction_id(tx: &Transaction) -> Wtxid {
    tx.compute_wtxid()
}

/// Double-SHA256 of the 80-byte header. `BlockHash` displays byte-reversed.
pub fn block_id(header: &Header) -> BlockHash {
    header.block_hash()
}

/// `base_size * 3 + total_size`.
pub fn weight(base_size: u64, total_size: u64) -> u64 {
    base_size * (WITNESS_SCALE_FACTOR - 1) + total_size
}

/// Weight divided by four, rounded up.
pub fn virtual_size(weight: u64) -> u64 {
    weight.div_ceil(WITNESS_SCALE_FACTOR)
}

/// Stripped size, total size and weight of a block. The stripped size is
/// recovered from the weight, since `weight = stripped * 3 + total`.
pub fn block_sizes(block: &Block) -> (u64, u64, u64) {
    let total = block.total_size() as u64;
    let weight = block.weight().to_wu();
    let stripped = (weight - total) / (WITNESS_SCALE_FACTOR - 1);
    (stripped, total, weight)
}

fn to_decoded(tx: &Transaction, raw: Vec<u8>) -> DecodedTransaction {
    let base_size = tx.base_size() as u64;
    let size = tx.total_size() as u64;
    let weight = weight(base_size, size);

    let inputs = tx
        .input
        .iter()
        .map(|input| TxInput {
            previous_txid: input.previous_output.txid,
            previous_index: input.previous_output.vout,
            script_sig: input.script_sig.clone(),
            witness: input.witness.clone(),
            sequence: input.sequence.0,
        })
        .collect();

    let outputs = tx
        .output
        .iter()
        .map(|output| TxOutput {
            value: output.value.to_sat(),
            script_pubkey: output.script_pubkey.clone(),
        })
        .collect();

    DecodedTransaction {
        txid: transaction_id(tx),
        wtxid: witness_transaction_id(tx),
        version: tx.version.0,
        lock_time: tx.lock_time.to_consensus_u32(),
        has_witness: tx.input.iter().any(|input| !input.witness.is_empty()),
        size,
        base_size,
        vsize: virtual_size(weight),
        weight,
        inputs,
        outputs,
        raw,
    }
}
