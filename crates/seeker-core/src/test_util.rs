//! Shared test helpers for `seeker-core` unit tests.
//!
//! Builders for consensus-level transactions and blocks, so decoder,
//! enrichment and gateway tests construct dummy chain data the same way.

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction,
    TxMerkleNode, TxIn, TxOut, Txid, Witness,
};

// ==============================================================================
// Txid Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

// ==============================================================================
// Script Builders
// ==============================================================================

/// OP_0 PUSH20 <20 bytes of `tag`>.
pub fn p2wpkh_script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    ScriptBuf::from_bytes(bytes)
}

/// OP_DUP OP_HASH160 PUSH20 <20 bytes of `tag`> OP_EQUALVERIFY OP_CHECKSIG.
pub fn p2pkh_script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x76, 0xa9, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    bytes.extend_from_slice(&[0x88, 0xac]);
    ScriptBuf::from_bytes(bytes)
}

/// OP_RETURN followed by a single push of `data` (at most 75 bytes).
pub fn op_return_script(data: &[u8]) -> ScriptBuf {
    assert!(data.len() <= 75, "helper only emits direct pushes");
    let mut bytes = vec![0x6a, data.len() as u8];
    bytes.extend_from_slice(data);
    ScriptBuf::from_bytes(bytes)
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// Build a version-2 transaction spending `inputs` (`(txid, vout)` pairs)
/// into `outputs` (`(sats, script)` pairs), with empty witnesses.
pub fn make_tx(inputs: Vec<(Txid, u32)>, outputs: Vec<(u64, ScriptBuf)>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .into_iter()
            .map(|(txid, vout)| TxIn {
                previous_output: OutPoint::new(txid, vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .into_iter()
            .map(|(sats, script_pubkey)| TxOut {
                value: Amount::from_sat(sats),
                script_pubkey,
            })
            .collect(),
    }
}

/// A coinbase paying `sats` to a P2WPKH script. `tag` lands in the
/// scriptSig so coinbases at different heights get distinct txids.
pub fn coinbase_tx(tag: u8, sats: u64) -> Transaction {
    let mut tx = make_tx(vec![], vec![(sats, p2wpkh_script(0xcb))]);
    tx.input.push(TxIn {
        previous_output: OutPoint::null(),
        script_sig: ScriptBuf::from_bytes(vec![0x01, tag, 0x00]),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    });
    tx
}

// ==============================================================================
// Block Builders
// ==============================================================================

/// Assemble a block on top of `prev` with a correct merkle root.
pub fn make_block(prev: BlockHash, txdata: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: Header {
            version: BlockVersion::TWO,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_700_000_000,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        },
        txdata,
    };
    if let Some(root) = block.compute_merkle_root() {
        block.header.merkle_root = root;
    }
    block
}
