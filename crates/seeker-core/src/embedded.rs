//! Counterparty message detection.
//!
//! Counterparty hides its messages in a transaction's null-data output,
//! ARC4-encrypted with the first input's previous txid as the key. A message
//! is recognised when the plaintext starts with [`COUNTERPARTY_PREFIX`].
//! Detection is best effort: any mismatch means "no message".

use bitcoin::blockdata::script::Instruction;
use bitcoin::hashes::Hash;
use bitcoin::Network;
use tracing::trace;

use crate::script::{classify_script, resolve_address};
use crate::types::{DecodedTransaction, EmbeddedMessage, ScriptType};

pub const COUNTERPARTY_PREFIX: &[u8; 8] = b"CNTRPRTY";

/// Look for a Counterparty envelope in `tx`.
pub fn detect_embedded_message(
    tx: &DecodedTransaction,
    network: Network,
) -> Option<EmbeddedMessage> {
    let first_input = tx.inputs.first()?;
    if first_input.is_coinbase() {
        return None;
    }

    let (data_index, data) = tx.outputs.iter().enumerate().find_map(|(n, output)| {
        (classify_script(&output.script_pubkey) == ScriptType::NullData)
            .then(|| (n, pushed_data(&output.script_pubkey)))
    })?;
    if data.len() <= COUNTERPARTY_PREFIX.len() {
        return None;
    }

    // The key is the txid as displayed, i.e. byte-reversed from its
    // internal order.
    let mut key = first_input.previous_txid.to_byte_array();
    key.reverse();

    let plaintext = Arc4::new(&key).apply(&data);
    let payload = plaintext.strip_prefix(COUNTERPARTY_PREFIX.as_slice())?;

    let destination = if data_index > 0 {
        resolve_address(&tx.outputs[0].script_pubkey, network)
    } else {
        None
    };

    trace!(txid = %tx.txid, payload_len = payload.len(), "detected counterparty message");
    Some(EmbeddedMessage {
        destination,
        payload: payload.to_vec(),
    })
}

/// Concatenation of every data push in a script. Opcodes are skipped, and a
/// malformed push ends the scan.
fn pushed_data(script: &bitcoin::Script) -> Vec<u8> {
    let mut data = Vec::new();
    for instruction in script.instructions() {
        match instruction {
            Ok(Instruction::PushBytes(bytes)) => data.extend_from_slice(bytes.as_bytes()),
            Ok(Instruction::Op(_)) => {}
            Err(_) => break,
        }
    }
    data
}

// ==============================================================================
// ARC4
// ==============================================================================

/// The ARC4 stream cipher. Encryption and decryption are the same operation.
struct Arc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Arc4 {
    fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (n, slot) in state.iter_mut().enumerate() {
            *slot = n as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Self { state, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .map(|byte| {
                self.i = self.i.wrapping_add(1);
                self.j = self.j.wrapping_add(self.state[self.i as usize]);
                self.state.swap(self.i as usize, self.j as usize);
                let k = self.state
                    [self.state[self.i as usize].wrapping_add(self.state[self.j as usize]) as usize];
                byte ^ k
            })
            .collect()
    }
}
