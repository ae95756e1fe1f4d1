//! Domain types for Seeker's enriched records.
//!
//! Contains the decoded transaction model (`DecodedTransaction`, `TxInput`,
//! `TxOutput`), the API-ready records produced by the enrichment engines
//! (`EnrichedTransaction`, `EnrichedBlock`, `Utxo`, `AddressBalancePage`),
//! and shared enums like `ScriptType` and `BlockHeight`.

use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;
use bitcoin::{BlockHash, ScriptBuf, TxMerkleNode, Txid, Witness, Wtxid};
use serde::{Deserialize, Serialize, Serializer};

// ==============================================================================
// Script Type Classification
// ==============================================================================

/// Output script template. Serialized with the node's naming so records
/// stay comparable with `getrawtransaction` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    #[serde(rename = "pubkey")]
    P2pk,
    #[serde(rename = "pubkeyhash")]
    P2pkh,
    #[serde(rename = "scripthash")]
    P2sh,
    #[serde(rename = "witness_v0_keyhash")]
    P2wpkh,
    #[serde(rename = "witness_v0_scripthash")]
    P2wsh,
    #[serde(rename = "witness_v1_taproot")]
    P2tr,
    #[serde(rename = "multisig")]
    Multisig,
    #[serde(rename = "nulldata")]
    NullData,
    #[serde(rename = "nonstandard")]
    Nonstandard,
}

impl ScriptType {
    /// Script types that never carry a canonical address.
    pub fn is_addressless(self) -> bool {
        matches!(self, Self::NullData | Self::Nonstandard)
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P2pk => write!(f, "pubkey"),
            Self::P2pkh => write!(f, "pubkeyhash"),
            Self::P2sh => write!(f, "scripthash"),
            Self::P2wpkh => write!(f, "witness_v0_keyhash"),
            Self::P2wsh => write!(f, "witness_v0_scripthash"),
            Self::P2tr => write!(f, "witness_v1_taproot"),
            Self::Multisig => write!(f, "multisig"),
            Self::NullData => write!(f, "nulldata"),
            Self::Nonstandard => write!(f, "nonstandard"),
        }
    }
}

// ==============================================================================
// Block Height
// ==============================================================================

/// A block height, wrapped for type safety.
///
/// `#[serde(transparent)]` preserves the JSON representation as a bare
/// integer, so this newtype is wire-compatible with plain `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u32 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Decoded Transaction
// ==============================================================================

/// A transaction as decoded from its consensus serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub txid: Txid,
    pub wtxid: Wtxid,
    pub version: i32,
    pub lock_time: u32,
    pub has_witness: bool,
    /// Serialized size including witness data.
    pub size: u64,
    /// Serialized size with witness data stripped.
    pub base_size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// The exact bytes the record was decoded from.
    pub raw: Vec<u8>,
}

impl DecodedTransaction {
    /// A coinbase transaction has exactly one input, and it is a coinbase input.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub previous_txid: Txid,
    pub previous_index: u32,
    pub script_sig: ScriptBuf,
    pub witness: Witness,
    pub sequence: u32,
}

impl TxInput {
    /// An all-zero previous txid marks the synthetic input that mints the
    /// block subsidy. It has no previous output to resolve.
    pub fn is_coinbase(&self) -> bool {
        self.previous_txid == Txid::all_zeros()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value: u64,
    pub script_pubkey: ScriptBuf,
}

// ==============================================================================
// Enriched Transaction
// ==============================================================================

/// Address reported for coinbase inputs in place of a resolved address.
pub const COINBASE_ADDRESS: &str = "coinbase";

/// A transaction with every input's source value and address resolved,
/// every output classified, and its fee computed.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedTransaction {
    pub txid: Txid,
    pub wtxid: Wtxid,
    #[serde(serialize_with = "serialize_hex")]
    pub hex: Vec<u8>,
    pub version: i32,
    pub lock_time: u32,
    pub has_witness: bool,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    /// Containing block, when the backend reports one.
    pub block_hash: Option<BlockHash>,
    /// Height of the containing block; `None` for unconfirmed transactions.
    pub confirmed_height: Option<BlockHeight>,
    pub inputs: Vec<EnrichedInput>,
    pub outputs: Vec<EnrichedOutput>,
    /// `sum(input values) - sum(output values)` in satoshis. Negative only
    /// for coinbase transactions, or when an input could not be resolved.
    pub fee: i64,
    pub embedded: Option<EmbeddedMessage>,
}

impl EnrichedTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].coinbase
    }

    /// `false` when any non-coinbase input's previous output could not be
    /// fetched, in which case `fee` understates the real fee.
    pub fn fee_is_complete(&self) -> bool {
        self.inputs.iter().all(|input| input.coinbase || input.resolved)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedInput {
    pub txid: Txid,
    pub vout: u32,
    pub script_sig: ScriptBuf,
    pub witness: Witness,
    pub sequence: u32,
    pub coinbase: bool,
    /// Value of the spent output; 0 for coinbase or unresolved inputs.
    pub value: u64,
    /// Address of the spent output, [`COINBASE_ADDRESS`] for coinbase
    /// inputs, `None` when unresolved or when the script has no address.
    pub address: Option<String>,
    pub script_type: Option<ScriptType>,
    /// Whether the previous output was fetched successfully.
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedOutput {
    pub n: u32,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub script_type: ScriptType,
    pub address: Option<String>,
}

/// An application-level message embedded in a transaction's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddedMessage {
    pub destination: Option<String>,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
}

// ==============================================================================
// Enriched Block
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedBlock {
    pub hash: BlockHash,
    pub height: BlockHeight,
    #[serde(serialize_with = "serialize_hex")]
    pub header: Vec<u8>,
    pub version: i32,
    pub previous_block_hash: BlockHash,
    pub merkle_root: TxMerkleNode,
    pub time: u32,
    #[serde(serialize_with = "serialize_bits")]
    pub bits: u32,
    pub nonce: u32,
    pub difficulty: f64,
    pub size: u64,
    pub stripped_size: u64,
    pub weight: u64,
    /// Transaction ids in on-chain order, coinbase first.
    pub txids: Vec<Txid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedBlockWithTxs {
    #[serde(flatten)]
    pub block: EnrichedBlock,
    pub txs: Vec<EnrichedTransaction>,
}

/// One row of a block listing: the header facts plus the transaction count,
/// without the txids themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSummary {
    pub hash: BlockHash,
    pub height: BlockHeight,
    pub time: u32,
    pub nonce: u32,
    pub size: u64,
    pub stripped_size: u64,
    pub weight: u64,
    pub tx_count: usize,
}

impl From<&EnrichedBlock> for BlockSummary {
    fn from(block: &EnrichedBlock) -> Self {
        Self {
            hash: block.hash,
            height: block.height,
            time: block.time,
            nonce: block.nonce,
            size: block.size,
            stripped_size: block.stripped_size,
            weight: block.weight,
            tx_count: block.txids.len(),
        }
    }
}

// ==============================================================================
// Address-keyed Records
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub script_type: ScriptType,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressBalanceEntry {
    pub script_pubkey: ScriptBuf,
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressBalancePage {
    pub count: u64,
    pub entries: Vec<AddressBalanceEntry>,
}

// ==============================================================================
// Serde Helpers
// ==============================================================================

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&bytes.to_lower_hex_string())
}

fn serialize_bits<S: Serializer>(bits: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{bits:08x}"))
}
