//! ShareProvider Daemon - document provider for network file shares
//!
//! Serves the host's document-browsing contract over a Unix socket, backed by
//! a single-slot directory cache, a SQLite metadata store and an on-disk
//! content cache.

mod accounts;
mod cache;
mod config;
mod ipc;
mod provider;
mod remote;
mod store;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use accounts::{AccountSource, AccountsFile};
use config::Config;
use ipc::IpcServer;
use provider::{Cursor, DocumentProvider};
use remote::{MountedShare, RemoteStore};
use store::DocumentStore;

/// How long `ls` waits for a listing that is not cached yet
const LS_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// List configured roots
    Roots,
    /// List a directory, waiting for the listing if it is not cached
    Ls { document_id: String },
    /// Show a document's metadata
    Stat { document_id: String },
    /// Download a document and write it to stdout
    Cat { document_id: String },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"ShareProvider Daemon - Browse network file shares as documents

USAGE:
    shareprovider-daemon                 # Run IPC server (default)
    shareprovider-daemon roots
    shareprovider-daemon ls <document_id>
    shareprovider-daemon stat <document_id>
    shareprovider-daemon cat <document_id>
    shareprovider-daemon help

COMMANDS:
    (none)  Run IPC server mode (waits for requests from the host)
    roots   List one root per configured account
    ls      List the children of a directory (ids end with '/')
    stat    Show the known metadata of a document
    cat     Download a document into the cache and print it
    help    Show this help message

EXAMPLES:
    shareprovider-daemon ls "Home/"
    shareprovider-daemon cat "Home/photos/cat.jpg" > cat.jpg

ENVIRONMENT:
    SHAREPROVIDER_CACHE_DIR      Content cache directory
    SHAREPROVIDER_DATABASE       Metadata database file
    SHAREPROVIDER_ACCOUNTS       Accounts JSON file
    SHAREPROVIDER_SOCKET         IPC socket path
    SHAREPROVIDER_FRESHNESS_MS   Directory listing freshness window
    SHAREPROVIDER_MAX_WORKERS    Concurrent background workers
    RUST_LOG                     Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    let document_id = |usage: &str| -> Result<String> {
        args.get(2)
            .cloned()
            .ok_or_else(|| anyhow!("Usage: shareprovider-daemon {} <document_id>", usage))
    };

    match args[1].as_str() {
        "server" => Ok(Command::Server),
        "roots" => Ok(Command::Roots),
        "ls" => Ok(Command::Ls {
            document_id: document_id("ls")?,
        }),
        "stat" => Ok(Command::Stat {
            document_id: document_id("stat")?,
        }),
        "cat" => Ok(Command::Cat {
            document_id: document_id("cat")?,
        }),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

fn print_cursor(cursor: &Cursor) {
    println!("{}", cursor.columns.join("\t"));
    for row in &cursor.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                provider::Value::Null => "-".to_string(),
                provider::Value::Integer(i) => i.to_string(),
                provider::Value::Text(s) => s.clone(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

fn build_provider(config: &Config) -> Result<DocumentProvider> {
    let accounts: Arc<dyn AccountSource> = Arc::new(AccountsFile::new(&config.accounts_path));
    let remote: Arc<dyn RemoteStore> = Arc::new(MountedShare::new());
    let store = DocumentStore::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open metadata store at {}",
            config.database_path.display()
        )
    })?;
    DocumentProvider::new(config, accounts, remote, store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::from_env();
    let provider = build_provider(&config)?;

    match command {
        Command::Server => {
            info!("Starting ShareProvider daemon in IPC server mode");

            let mut ipc_server = IpcServer::new(provider.clone(), config.socket_path.clone());
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }

            info!("Daemon ready. Waiting for requests from the host...");

            // Wait for Ctrl+C
            tokio::select! {
                result = ipc_server.run() => {
                    if let Err(e) = result {
                        error!(error = %e, "IPC server error");
                    }
                }
                signal = tokio::signal::ctrl_c() => signal?,
            }

            info!("Received shutdown signal, stopping workers...");
            provider.shutdown().await;
            ipc_server.stop().await?;

            info!("Shutdown complete.");
        }
        Command::Roots => {
            let roots = provider.list_roots();
            if roots.is_empty() {
                println!("No accounts configured in {}", config.accounts_path.display());
            }
            for root in roots {
                match root.summary {
                    Some(summary) => println!("{}\t{}", root.document_id, summary),
                    None => println!("{}", root.document_id),
                }
            }
        }
        Command::Ls { document_id } => {
            // Subscribe first so the refresh cannot finish unseen
            let mut changes = provider.subscribe();
            let mut cursor = provider.query_child_documents(&document_id, &None)?;
            if cursor.loading {
                // A failed refresh sends nothing; give up after a while
                let changed = tokio::time::timeout(LS_TIMEOUT, async {
                    loop {
                        match changes.recv().await {
                            Ok(n) if n.document_id == document_id => return true,
                            Ok(_) | Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => return false,
                        }
                    }
                })
                .await
                .unwrap_or(false);
                if !changed {
                    return Err(anyhow!("Timed out listing {}", document_id));
                }
                cursor = provider.query_child_documents(&document_id, &None)?;
            }
            print_cursor(&cursor);
            provider.shutdown().await;
        }
        Command::Stat { document_id } => {
            print_cursor(&provider.query_document(&document_id, &None)?);
        }
        Command::Cat { document_id } => {
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.cancel();
                }
            });

            let opened = provider.open_document(&document_id, "r", cancel).await?;
            info!(path = %opened.path.display(), "Document available in cache");
            let mut file = opened.file;
            let mut content = Vec::new();
            file.read_to_end(&mut content).await?;
            std::io::stdout().write_all(&content)?;
            provider.shutdown().await;
        }
        Command::Help => {}
    }

    Ok(())
}
