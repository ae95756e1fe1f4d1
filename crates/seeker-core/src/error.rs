/// Errors produced while talking to a node or index backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("JSON-RPC server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("offset {offset} is out of range ({count} records)")]
    OutOfRange { offset: u64, count: u64 },

    #[error("backend does not support {0}")]
    Unsupported(&'static str),
}

impl CoreError {
    /// `true` for failures caused by the caller's request (lookup misses,
    /// unparsable ids, paging past the end) rather than by the engine or
    /// its backends.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidInput(_) | Self::OutOfRange { .. }
        )
    }
}
