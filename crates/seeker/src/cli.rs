use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use seeker_core::backend::TransportOptions;
use seeker_core::{BackendConfig, BackendKind};

/// Seeker: enriched Bitcoin transactions, blocks and address data from a
/// node's REST interface or a chain index.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Which backend answers lookups.
    #[arg(long, value_enum, default_value = "node", env = "SEEKER_BACKEND")]
    pub backend: BackendChoice,

    /// Node REST root (requires `-rest=1` on the node).
    #[arg(long, default_value = "http://127.0.0.1:8332/rest", env = "SEEKER_REST_URL")]
    pub rest_url: String,

    /// Node JSON-RPC URL, needed only for `broadcast`.
    #[arg(long, env = "SEEKER_RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, env = "SEEKER_RPC_USER")]
    pub rpc_user: Option<String>,

    #[arg(long, env = "SEEKER_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Cookie file used when no user/pass is given.
    #[arg(long, env = "SEEKER_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Chain index API root.
    #[arg(long, default_value = "http://127.0.0.1:6000/api/v1", env = "SEEKER_INDEX_URL")]
    pub index_url: String,

    /// Chain the addresses are rendered for.
    #[arg(long, default_value = "bitcoin", env = "SEEKER_NETWORK")]
    pub network: bitcoin::Network,

    /// Maximum concurrent node calls.
    #[arg(long, default_value = "4", env = "SEEKER_NODE_CONCURRENCY")]
    pub node_concurrency: usize,

    /// Maximum concurrent index calls (unbounded if omitted).
    #[arg(long, env = "SEEKER_INDEX_CONCURRENCY")]
    pub index_concurrency: Option<usize>,

    /// Client-side request rate limit per backend.
    #[arg(long, env = "SEEKER_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    /// Per-request HTTP timeout, and the overall deadline for a command.
    #[arg(long, default_value = "30", env = "SEEKER_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    Node,
    Index,
    Hybrid,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Current tip height.
    Status,
    /// Enriched transaction.
    Tx { txid: String },
    /// Block by height or hash.
    Block {
        id: String,
        /// Include every transaction, enriched.
        #[arg(long)]
        txs: bool,
    },
    /// Consecutive block summaries from a start height.
    Blocks {
        #[arg(long, default_value = "0")]
        start: u32,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Transactions touching an address (or script hex).
    Txids { address: String },
    /// Enriched transactions touching an address (or script hex).
    Txs { address: String },
    /// Unspent outputs of an address (or script hex).
    Utxos { address: String },
    /// Position of an address in the balance ranking.
    Rank { address: String },
    /// A page of the balance ranking.
    RichList {
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(long, default_value = "100")]
        limit: u64,
    },
    /// Relay a signed transaction given as hex.
    Broadcast { hex: String },
}

impl Cli {
    pub fn backend_config(&self) -> BackendConfig {
        let kind = match self.backend {
            BackendChoice::Node => BackendKind::Node,
            BackendChoice::Index => BackendKind::Index,
            BackendChoice::Hybrid => BackendKind::Hybrid,
        };
        let uses_node = kind != BackendKind::Index;
        let uses_index = kind != BackendKind::Node;

        let mut config = BackendConfig::new(kind);
        config.node_rest_url = uses_node.then(|| self.rest_url.clone());
        config.rpc_url = self.rpc_url.clone();
        config.rpc_user = self.rpc_user.clone();
        config.rpc_pass = self.rpc_pass.clone();
        config.rpc_cookie_file = self.rpc_cookie_file.clone();
        config.index_url = uses_index.then(|| self.index_url.clone());
        config.node_concurrency = self.node_concurrency;
        config.index_concurrency = self.index_concurrency;
        config.transport = TransportOptions {
            timeout: std::time::Duration::from_secs(self.timeout_secs),
            requests_per_second: self.requests_per_second,
        };
        config
    }

    /// The URL a connection failure most likely concerns.
    pub fn primary_url(&self) -> &str {
        match self.backend {
            BackendChoice::Index => &self.index_url,
            BackendChoice::Node | BackendChoice::Hybrid => &self.rest_url,
        }
    }
}
