use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use blueblock_anchor::anchor::TimeWindow;
use blueblock_anchor::config::Config;
use blueblock_anchor::error::{AnchorError, Result};
use blueblock_anchor::ledger::{Address, AlgodClient};
use blueblock_anchor::merkle::{
    batch_bytes, parse_digest, record_leaf, verify, InclusionProof, MerkleTree,
};
use blueblock_anchor::server::{self, AppState};
use blueblock_anchor::service::AnchorService;

#[derive(Parser)]
#[command(name = "blueblock-anchor")]
#[command(about = "Anchor Merkle roots of ecological record batches on Algorand")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
        bind: String,
    },
    /// Build the unsigned anchor transaction for a batch
    Prepare {
        /// Address that will sign the transaction
        #[arg(long)]
        sender: String,
        #[arg(long)]
        project: String,
        /// JSON file holding an array of records
        #[arg(long)]
        records: PathBuf,
        /// Window start (unix seconds); defaults to one window before now
        #[arg(long, requires = "to")]
        from: Option<u64>,
        /// Window end (unix seconds)
        #[arg(long, requires = "from")]
        to: Option<u64>,
    },
    /// Build the unsigned opt-in transaction for an account
    OptIn {
        #[arg(long)]
        sender: String,
    },
    /// Relay a signed transaction and wait for confirmation
    Submit {
        /// Base64 of the signed transaction
        signed: String,
    },
    /// Print the number of confirmed anchors
    Count,
    /// Print one anchor
    Anchor { index: u64 },
    /// Print every anchor
    List,
    /// Print the root and the inclusion proof for one record of a batch
    Prove {
        #[arg(long)]
        records: PathBuf,
        #[arg(long)]
        index: usize,
    },
    /// Check a record against a root or a confirmed anchor
    Verify {
        /// The record, as JSON
        #[arg(long)]
        record: String,
        /// JSON file holding the inclusion proof
        #[arg(long)]
        proof: PathBuf,
        /// Hex Merkle root
        #[arg(long, conflicts_with = "anchor", required_unless_present = "anchor")]
        root: Option<String>,
        /// Index of a confirmed anchor
        #[arg(long)]
        anchor: Option<u64>,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        AnchorError::InvalidInput(format!("{} is not valid JSON: {e}", path.display()))
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AnchorError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn service(config: &Config) -> Result<AnchorService> {
    let ledger = Arc::new(AlgodClient::new(config.algod())?);
    Ok(
        AnchorService::new(ledger, config.require_app_id()?, config.confirmation_policy())
            .with_network(config.network)
            .with_default_window(config.default_window_secs),
    )
}

/// Cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            trigger.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    cli.config.validate()?;

    match cli.command {
        Commands::Serve { bind } => {
            let state = AppState {
                service: Arc::new(service(&cli.config)?),
                shutdown: shutdown_token(),
            };
            server::serve(state, &bind).await
        }
        Commands::Prepare {
            sender,
            project,
            records,
            from,
            to,
        } => {
            let sender: Address = sender.parse()?;
            let records: Vec<Value> = read_json(&records)?;
            let window = match (from, to) {
                (Some(from), Some(to)) => Some(TimeWindow::new(from, to)?),
                _ => None,
            };
            let prepared = service(&cli.config)?
                .prepare(&sender, &project, &records, window)
                .await?;
            print_json(&json!({
                "transaction": STANDARD.encode(&prepared.encoded),
                "txId": prepared.tx_id,
                "merkleRoot": hex::encode(prepared.root),
                "recordCount": prepared.record_count,
                "fromTimestamp": prepared.window.from,
                "toTimestamp": prepared.window.to,
            }))
        }
        Commands::OptIn { sender } => {
            let sender: Address = sender.parse()?;
            let prepared = service(&cli.config)?.prepare_opt_in(&sender).await?;
            print_json(&json!({
                "transaction": STANDARD.encode(&prepared.encoded),
                "txId": prepared.tx_id,
            }))
        }
        Commands::Submit { signed } => {
            let signed = STANDARD.decode(signed.trim()).map_err(|e| {
                AnchorError::InvalidInput(format!("signed transaction is not base64: {e}"))
            })?;
            let service = service(&cli.config)?;
            let submission = service.submit(&signed, &shutdown_token()).await?;
            print_json(&json!({
                "txId": submission.tx_id,
                "confirmedRound": submission.confirmed_round,
                "anchorIndex": submission.anchor_index,
                "explorerUrl": service.explorer_tx_url(&submission.tx_id),
            }))
        }
        Commands::Count => {
            let count = service(&cli.config)?.get_anchor_count().await?;
            print_json(&json!({ "anchorCount": count }))
        }
        Commands::Anchor { index } => {
            print_json(&service(&cli.config)?.get_anchor(index).await?)
        }
        Commands::List => print_json(&json!({
            "anchors": service(&cli.config)?.list_anchors().await?,
        })),
        Commands::Prove { records, index } => {
            // Proofs need no ledger access.
            let records: Vec<Value> = read_json(&records)?;
            let tree = MerkleTree::from_leaves(&batch_bytes(&records)?)?;
            let proof = tree.prove(index)?;
            print_json(&json!({ "merkleRoot": hex::encode(tree.root()), "proof": proof }))
        }
        Commands::Verify {
            record,
            proof,
            root,
            anchor,
        } => {
            let record: Value = serde_json::from_str(&record)
                .map_err(|e| AnchorError::InvalidInput(format!("record is not valid JSON: {e}")))?;
            let proof: InclusionProof = read_json(&proof)?;
            let included = match (anchor, root) {
                (Some(index), _) => {
                    service(&cli.config)?
                        .verify_against_anchor(&record, &proof, index)
                        .await?
                }
                (None, Some(root)) => verify(&record_leaf(&record)?, &proof, &parse_digest(&root)?),
                (None, None) => {
                    return Err(AnchorError::InvalidInput(
                        "either --root or --anchor is required".into(),
                    ))
                }
            };
            print_json(&json!({ "included": included }))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = e.kind(), "{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
