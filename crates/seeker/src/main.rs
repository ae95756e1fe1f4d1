mod cli;

use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use serde::Serialize;
use serde_json::{json, Value};

use seeker_core::error::BackendError;
use seeker_core::{build_backend, parse_txid, BlockHeight, BlockId, CoreError, Gateway};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let backend = build_backend(&args.backend_config()).wrap_err("configure backend")?;
    let gateway = Gateway::new(backend, args.network);
    tracing::info!(
        backend = ?args.backend,
        network = %args.network,
        url = args.primary_url(),
        "seeker ready"
    );

    let deadline = Duration::from_secs(args.timeout_secs);
    let output = tokio::time::timeout(deadline, run(&gateway, &args.command, args.primary_url()))
        .await
        .map_err(|_| eyre!("no answer from `{}` within {}s", args.primary_url(), args.timeout_secs))??;

    let rendered = serde_json::to_string_pretty(&output).context("render output")?;
    println!("{rendered}");
    Ok(())
}

async fn run(gateway: &Gateway, command: &Command, url: &str) -> eyre::Result<Value> {
    match command {
        Command::Status => to_json(gateway.get_status().await, url),
        Command::Tx { txid } => {
            let txid = parse_txid(txid).map_err(|err| explain(err, url))?;
            to_json(gateway.get_transaction(&txid).await, url)
        }
        Command::Block { id, txs } => {
            let id: BlockId = id.parse().map_err(|err| explain(err, url))?;
            if *txs {
                to_json(gateway.get_block_with_txs(id).await, url)
            } else {
                to_json(gateway.get_block(id).await, url)
            }
        }
        Command::Blocks { start, limit } => to_json(
            gateway.get_block_summaries(BlockHeight(*start), *limit).await,
            url,
        ),
        Command::Txids { address } => to_json(gateway.get_address_txids(address).await, url),
        Command::Txs { address } => to_json(gateway.get_address_txs(address).await, url),
        Command::Utxos { address } => to_json(gateway.get_utxos(address).await, url),
        Command::Rank { address } => {
            let rank = gateway
                .get_address_rank(address)
                .await
                .map_err(|err| explain(err, url))?;
            Ok(json!({ "rank": rank }))
        }
        Command::RichList { offset, limit } => to_json(
            gateway.get_address_balances_page(*offset, *limit).await,
            url,
        ),
        Command::Broadcast { hex } => {
            let txid = gateway
                .broadcast_raw_transaction(hex)
                .await
                .map_err(|err| explain(err, url))?;
            Ok(json!({ "txid": txid }))
        }
    }
}

fn to_json<T: Serialize>(result: Result<T, CoreError>, url: &str) -> eyre::Result<Value> {
    let value = result.map_err(|err| explain(err, url))?;
    serde_json::to_value(value).context("serialize result")
}

/// Attach an actionable hint to connection-level failures.
fn explain(err: CoreError, url: &str) -> eyre::Report {
    match &err {
        CoreError::BackendUnavailable(BackendError::Transport(_) | BackendError::Status { .. }) => {
            let message = format_connect_error(url, &err.to_string());
            eyre!(message).wrap_err("while contacting the backend")
        }
        _ => eyre::Report::new(err),
    }
}

fn format_connect_error(url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not query backend `{url}`"),
        format!("backend error: {source_error}"),
    ];

    if source_error.contains("dns error") || source_error.contains("Could not resolve host") {
        lines.push(
            "hint: hostname resolution failed; verify the backend hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("tls") || source_error.contains("certificate") {
        lines.push(
            "hint: TLS handshake failed; verify certificate trust and that the endpoint uses HTTPS"
                .into(),
        );
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push("hint: authentication failed; verify --rpc-user/--rpc-pass or --rpc-cookie-file".into());
    } else if source_error.contains("404") {
        lines.push(
            "hint: endpoint path is invalid; the node needs -rest=1 and the URL must end in /rest"
                .into(),
        );
    } else if source_error.contains("error sending request for url") {
        lines.push("hint: request could not be sent; verify the URL and that the backend is running".into());
    }

    lines.join("\n")
}
