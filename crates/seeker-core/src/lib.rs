pub mod backend;
pub mod block;
pub mod decode;
pub mod embedded;
pub mod enrich;
pub mod error;
pub mod gateway;
pub mod script;
pub mod types;

#[cfg(test)]
mod test_util;

pub use backend::{build_backend, BackendConfig, BackendKind, ChainBackend};
pub use block::BlockId;
pub use error::CoreError;
pub use gateway::{parse_txid, Gateway};
pub use types::{
    BlockHeight, BlockSummary, EnrichedBlock, EnrichedBlockWithTxs, EnrichedTransaction,
};
