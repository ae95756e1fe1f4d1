//! Transaction enrichment.
//!
//! Turns a decoded transaction into an [`EnrichedTransaction`]: previous
//! outputs resolved concurrently through the backend, fee computed, outputs
//! classified, embedded message detected and confirmation height looked up.
//! Previous-output resolution is the only step allowed to fail partially.

use std::collections::{HashMap, HashSet};

use bitcoin::{Network, Txid};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::backend::{ChainBackend, TxMeta};
use crate::decode::decode_transaction;
use crate::embedded::detect_embedded_message;
use crate::error::CoreError;
use crate::script::{classify_script, resolve_address};
use crate::types::{
    BlockHeight, DecodedTransaction, EnrichedInput, EnrichedOutput, EnrichedTransaction, TxInput,
    TxOutput, COINBASE_ADDRESS,
};

// ==============================================================================
// Entry Points
// ==============================================================================

/// Fetch, decode and enrich the transaction `txid`. Bytes that do not
/// decode count as no such transaction (`NotFound`).
pub async fn enrich_transaction(
    backend: &dyn ChainBackend,
    network: Network,
    txid: &Txid,
) -> Result<EnrichedTransaction, CoreError> {
    let (bytes, location) = backend.fetch_tx(txid).await?;
    let decoded = decode_transaction(&bytes).map_err(|err| {
        warn!(txid = %txid, error = %err, "backend served undecodable transaction");
        CoreError::NotFound(format!("transaction {txid}: {err}"))
    })?;
    enrich_decoded(backend, network, decoded, location).await
}

/// Enrich an already-decoded transaction whose position in the chain is
/// known (or known to be unconfirmed). Only previous outputs and, when
/// needed, the block height are fetched.
pub async fn enrich_decoded(
    backend: &dyn ChainBackend,
    network: Network,
    tx: DecodedTransaction,
    location: TxMeta,
) -> Result<EnrichedTransaction, CoreError> {
    let (inputs, confirmed_height) = futures::join!(
        resolve_inputs(backend, network, &tx.inputs),
        resolve_height(backend, &location),
    );
    let confirmed_height = confirmed_height?;

    let outputs = enrich_outputs(&tx.outputs, network);
    let fee = compute_fee(&inputs, &outputs)?;
    let embedded = detect_embedded_message(&tx, network);

    debug!(
        txid = %tx.txid,
        inputs = inputs.len(),
        outputs = outputs.len(),
        fee,
        "enriched transaction"
    );

    Ok(EnrichedTransaction {
        txid: tx.txid,
        wtxid: tx.wtxid,
        hex: tx.raw,
        version: tx.version,
        lock_time: tx.lock_time,
        has_witness: tx.has_witness,
        size: tx.size,
        vsize: tx.vsize,
        weight: tx.weight,
        block_hash: location.block_hash,
        confirmed_height,
        inputs,
        outputs,
        fee,
        embedded,
    })
}

// ==============================================================================
// Previous-output Resolution
// ==============================================================================

/// Resolve every input's spent output. Each distinct previous transaction
/// is fetched once, all fetches run concurrently.
async fn resolve_inputs(
    backend: &dyn ChainBackend,
    network: Network,
    inputs: &[TxInput],
) -> Vec<EnrichedInput> {
    let mut seen = HashSet::new();
    let previous: Vec<Txid> = inputs
        .iter()
        .filter(|input| !input.is_coinbase())
        .map(|input| input.previous_txid)
        .filter(|txid| seen.insert(*txid))
        .collect();

    let fetched = join_all(previous.iter().map(|txid| async move {
        let result = match backend.fetch_tx_bytes(txid).await {
            Ok(bytes) => decode_transaction(&bytes),
            Err(err) => Err(err),
        };
        (*txid, result)
    }))
    .await;
    let previous: HashMap<Txid, Result<DecodedTransaction, CoreError>> =
        fetched.into_iter().collect();

    inputs
        .iter()
        .map(|input| enrich_input(input, &previous, network))
        .collect()
}

fn enrich_input(
    input: &TxInput,
    previous: &HashMap<Txid, Result<DecodedTransaction, CoreError>>,
    network: Network,
) -> EnrichedInput {
    let mut enriched = EnrichedInput {
        txid: input.previous_txid,
        vout: input.previous_index,
        script_sig: input.script_sig.clone(),
        witness: input.witness.clone(),
        sequence: input.sequence,
        coinbase: input.is_coinbase(),
        value: 0,
        address: None,
        script_type: None,
        resolved: false,
    };

    if enriched.coinbase {
        enriched.address = Some(COINBASE_ADDRESS.to_owned());
        return enriched;
    }

    let spent = match previous.get(&input.previous_txid) {
        Some(Ok(tx)) => tx.outputs.get(input.previous_index as usize),
        Some(Err(err)) => {
            warn!(
                prev.txid = %input.previous_txid,
                prev.vout = input.previous_index,
                error = %err,
                "previous transaction unavailable; input left unresolved"
            );
            return enriched;
        }
        None => None,
    };

    match spent {
        Some(output) => {
            enriched.value = output.value;
            enriched.script_type = Some(classify_script(&output.script_pubkey));
            enriched.address = resolve_address(&output.script_pubkey, network);
            enriched.resolved = true;
        }
        None => {
            warn!(
                prev.txid = %input.previous_txid,
                prev.vout = input.previous_index,
                "previous output index out of range; input left unresolved"
            );
        }
    }
    enriched
}

// ==============================================================================
// Outputs, Fee and Height
// ==============================================================================

fn enrich_outputs(outputs: &[TxOutput], network: Network) -> Vec<EnrichedOutput> {
    outputs
        .iter()
        .zip(0u32..)
        .map(|(output, n)| EnrichedOutput {
            n,
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
            script_type: classify_script(&output.script_pubkey),
            address: resolve_address(&output.script_pubkey, network),
        })
        .collect()
}

/// `sum(inputs) - sum(outputs)` in satoshis. Unresolved and coinbase inputs
/// count as zero, so a coinbase fee is the negated output total.
pub fn compute_fee(inputs: &[EnrichedInput], outputs: &[EnrichedOutput]) -> Result<i64, CoreError> {
    let total_in = inputs
        .iter()
        .try_fold(0u64, |acc, input| acc.checked_add(input.value))
        .ok_or_else(|| CoreError::MalformedData("input values overflow u64".to_owned()))?;
    let total_out = outputs
        .iter()
        .try_fold(0u64, |acc, output| acc.checked_add(output.value))
        .ok_or_else(|| CoreError::MalformedData("output values overflow u64".to_owned()))?;

    i64::try_from(i128::from(total_in) - i128::from(total_out)).map_err(|_| {
        CoreError::MalformedData(format!(
            "fee out of range: inputs {total_in}, outputs {total_out}"
        ))
    })
}

async fn resolve_height(
    backend: &dyn ChainBackend,
    location: &TxMeta,
) -> Result<Option<BlockHeight>, CoreError> {
    if location.block_height.is_some() {
        return Ok(location.block_height);
    }
    let Some(hash) = location.block_hash else {
        return Ok(None);
    };
    match backend.fetch_block_height(&hash).await {
        Ok(height) => Ok(Some(height)),
        // The block was reported but is no longer known, e.g. after a reorg.
        Err(CoreError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
