use crate::error::{BackendError, CoreError};

#[derive(serde::Serialize)]
pub(super) struct JsonRpcRequest<'a> {
    pub(super) jsonrpc: &'static str,
    pub(super) id: u64,
    pub(super) method: &'a str,
    pub(super) params: Vec<serde_json::Value>,
}

#[derive(serde::Deserialize)]
pub(super) struct JsonRpcResponse {
    pub(super) result: Option<serde_json::Value>,
    pub(super) error: Option<serde_json::Value>,
}

/// Parse a JSON-RPC error value into a structured `CoreError`.
///
/// Errors shaped `{"code": <int>, "message": <string>}` become
/// `ServerError`; anything else becomes `InvalidResponse` with the raw JSON.
pub(super) fn parse_jsonrpc_error(err: serde_json::Value) -> CoreError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    if let Ok(parsed) = serde_json::from_value::<JsonRpcError>(err.clone()) {
        BackendError::ServerError {
            code: parsed.code,
            message: parsed.message,
        }
        .into()
    } else {
        BackendError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")).into()
    }
}

/// `sendrawtransaction` error codes that blame the submitted transaction
/// rather than the node: decode failure (-22), already in chain (-27),
/// verify error (-25) and mempool rejection (-26).
const REJECTED_TX_CODES: [i64; 4] = [-22, -25, -26, -27];

/// Turn node rejections of a broadcast into `InvalidInput`, leaving
/// transport and server failures as they are.
pub(super) fn normalize_broadcast_error(err: CoreError) -> CoreError {
    match err {
        CoreError::BackendUnavailable(BackendError::ServerError { code, message })
            if REJECTED_TX_CODES.contains(&code) =>
        {
            CoreError::InvalidInput(format!("transaction rejected ({code}): {message}"))
        }
        other => other,
    }
}
