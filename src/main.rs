use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use walletrail::application::ledger::Ledger;
use walletrail::application::poller::StatusPoller;
use walletrail::application::router::PaymentRouter;
use walletrail::application::webhooks::WebhookListener;
use walletrail::config::fetch_config;
use walletrail::domain::ports::Stores;
use walletrail::error::PaymentError;
use walletrail::infrastructure::in_memory;
#[cfg(feature = "storage-rocksdb")]
use walletrail::infrastructure::rocksdb::RocksDBStore;
use walletrail::interfaces::csv::event_reader::EventReader;
use walletrail::interfaces::csv::outcome_writer::OutcomeWriter;
use walletrail::interfaces::http;

/// Pending live transactions picked back up for polling when the server starts.
const RESUME_LIMIT: usize = 1_000;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for provider webhooks.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Settle pending transactions from a provider settlement report
    /// (`reference,status,provider_ref`).
    Reconcile {
        /// Input events CSV file
        input: PathBuf,
    },
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(store.stores())
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(in_memory::stores())
        }
        None => Ok(in_memory::stores()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stores = open_stores(cli.db_path)?;
    let ledger = Arc::new(Ledger::new(Arc::new(stores)));

    match cli.command {
        Command::Serve { bind } => serve(ledger, bind).await,
        Command::Reconcile { input } => reconcile(&ledger, input).await,
    }
}

async fn serve(ledger: Arc<Ledger>, bind: SocketAddr) -> Result<()> {
    let config = fetch_config().into_diagnostic()?;
    let router = Arc::new(PaymentRouter::from_config(&config));
    let poller = StatusPoller::new(ledger.clone(), router.clone(), config.poll);
    for tx in ledger.pending(RESUME_LIMIT).await.into_diagnostic()? {
        if !tx.simulated {
            poller.watch(&tx.reference);
        }
    }

    let app = http::router(Arc::new(WebhookListener::new(ledger, router)));
    let listener = tokio::net::TcpListener::bind(bind).await.into_diagnostic()?;
    info!(%bind, resumed = poller.active(), "webhook listener started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()?;
    poller.shutdown();
    Ok(())
}

async fn reconcile(ledger: &Ledger, input: PathBuf) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let reader = EventReader::new(file);
    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());

    for event in reader.events() {
        match event {
            Ok(event) => {
                match ledger
                    .operator_resolve(&event.reference, event.status, event.provider_ref)
                    .await
                {
                    Ok(settlement) => {
                        writer.write(&event.reference, &settlement).into_diagnostic()?
                    }
                    Err(e @ PaymentError::InvalidTransition(_)) => {
                        eprintln!("Error processing event {}: {}", event.reference, e);
                        writer.write_label(&event.reference, "rejected").into_diagnostic()?;
                    }
                    Err(e) => return Err(e).into_diagnostic(),
                }
            }
            Err(e) => {
                eprintln!("Error reading event: {}", e);
            }
        }
    }

    writer.flush().into_diagnostic()?;
    Ok(())
}
