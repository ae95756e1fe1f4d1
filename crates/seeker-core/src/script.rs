//! Output script classification and address rendering.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, Script, ScriptBuf};

use crate::error::CoreError;
use crate::types::ScriptType;

/// Classify a script using the `bitcoin` crate's built-in detection methods.
/// Total: anything that matches no template is `Nonstandard`.
#[must_use]
pub fn classify_script(script: &Script) -> ScriptType {
    if script.is_p2pkh() {
        ScriptType::P2pkh
    } else if script.is_p2sh() {
        ScriptType::P2sh
    } else if script.is_p2wpkh() {
        ScriptType::P2wpkh
    } else if script.is_p2wsh() {
        ScriptType::P2wsh
    } else if script.is_p2tr() {
        ScriptType::P2tr
    } else if script.is_p2pk() {
        ScriptType::P2pk
    } else if script.is_multisig() {
        ScriptType::Multisig
    } else if script.is_op_return() {
        ScriptType::NullData
    } else {
        ScriptType::Nonstandard
    }
}

/// Render the address a script pays to: base58check for P2PKH/P2SH, bech32
/// or bech32m for witness programs. Scripts without an address form
/// (null-data, nonstandard, bare pubkey, bare multisig) yield `None`.
#[must_use]
pub fn resolve_address(script: &Script, network: Network) -> Option<String> {
    if classify_script(script).is_addressless() {
        return None;
    }
    Address::from_script(script, network)
        .ok()
        .map(|address| address.to_string())
}

/// Convert a user-supplied address into the script it pays to.
pub fn script_for_address(address: &str, network: Network) -> Result<ScriptBuf, CoreError> {
    let unchecked: Address<NetworkUnchecked> = address
        .trim()
        .parse()
        .map_err(|e| CoreError::InvalidInput(format!("invalid address `{address}`: {e}")))?;
    let checked = unchecked.require_network(network).map_err(|e| {
        CoreError::InvalidInput(format!("address `{address}` is not valid on {network}: {e}"))
    })?;
    Ok(checked.script_pubkey())
}

/// Accept either an address or a raw script in hex. The address reading is
/// tried first; when the input is not hex either, the address error is
/// reported.
pub fn script_for_address_or_hex(input: &str, network: Network) -> Result<ScriptBuf, CoreError> {
    let input = input.trim();
    match script_for_address(input, network) {
        Ok(script) => Ok(script),
        Err(err) => match ScriptBuf::from_hex(input) {
            Ok(script) if !script.is_empty() => Ok(script),
            _ => Err(err),
        },
    }
}
