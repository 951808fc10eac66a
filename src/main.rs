use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::de::DeserializeOwned;

use signal_sync::config::AppConfig;
use signal_sync::dispatch::{self, LoggingDispatcher};
use signal_sync::error::with_retry;
use signal_sync::storage::{RemoteStore, StateStore};
use signal_sync::{
    logging, server, ControlMode, RetryPolicy, SignalColor, StateDocument, StatePatch,
    StoreBackend, SyncEngine, TransportKind,
};

#[derive(Parser)]
#[command(name = "signal-sync")]
#[command(about = "Shared traffic-signal configuration with last-writer-wins sync", version)]
#[command(after_help = "Configuration:
- Optional TOML file passed with --config ([server], [client], [logging] tables)
- SIGNAL_SYNC_* environment variables override the file (a .env file is read)
- RUST_LOG overrides the configured log level")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Endpoint base URL for client commands
    #[arg(short, long, global = true, value_name = "URL")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authoritative endpoint
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        /// Nest every route under this prefix, e.g. /api
        #[arg(long)]
        base_path: Option<String>,
        /// volatile or sqlite
        #[arg(long)]
        persistence: Option<StoreBackend>,
        #[arg(long, value_name = "PATH")]
        db_path: Option<PathBuf>,
    },
    /// Follow the shared document and print every change
    Watch {
        /// polling, push-socket or push-stream
        #[arg(short, long)]
        transport: Option<TransportKind>,
        /// Log the device commands each change would send
        #[arg(long)]
        dispatch: bool,
    },
    /// Print the current document
    Get,
    /// Switch the control mode (manual, auto, semi)
    SetMode { mode: String },
    /// Set one pole's signal color (red, yellow, green)
    SetSignal { pole: String, color: String },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.client.endpoint = endpoint;
    }
    let _log_guard = logging::init(&config.logging);

    match cli.command {
        Commands::Serve {
            port,
            host,
            base_path,
            persistence,
            db_path,
        } => {
            let mut server_config = config.server;
            if let Some(port) = port {
                server_config.port = port;
            }
            if let Some(host) = host {
                server_config.host = host;
            }
            if let Some(base_path) = base_path {
                server_config.base_path = base_path;
            }
            if let Some(persistence) = persistence {
                server_config.persistence = persistence;
            }
            if let Some(db_path) = db_path {
                server_config.sqlite_path = db_path;
            }

            println!(
                "{}",
                format!(
                    "🚦 Starting endpoint on port {} ({} store)...",
                    server_config.port, server_config.persistence
                )
                .cyan()
                .bold()
            );
            server::start(server_config).await?;
        }
        Commands::Watch {
            transport,
            dispatch: log_commands,
        } => {
            let mut client = config.client;
            if let Some(transport) = transport {
                client.transport = transport;
            }
            println!(
                "{}",
                format!("👁  Following {} via {}...", client.endpoint, client.transport)
                    .cyan()
                    .bold()
            );

            let engine = SyncEngine::from_config(client)?;
            let _printer = engine.subscribe(print_document);
            let _devices =
                log_commands.then(|| dispatch::attach(&engine, Arc::new(LoggingDispatcher)));
            engine.start().await?;

            let mut status = engine.connection_status();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now = *status.borrow_and_update();
                        let label = format!("{now:?}").to_lowercase();
                        if now.is_live() {
                            println!("{} {}", "●".green(), label);
                        } else {
                            println!("{} {}", "●".yellow(), label);
                        }
                    }
                }
            }
            engine.stop();
        }
        Commands::Get => {
            let store = RemoteStore::new(&config.client.endpoint, config.client.request_timeout())?;
            match store.get_state().await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("{}", "No state stored yet".yellow()),
            }
        }
        Commands::SetMode { mode } => {
            let mode: ControlMode = parse_value("control mode", &mode)?;
            write(config, |_| Ok(StatePatch::control_mode(mode))).await?;
        }
        Commands::SetSignal { pole, color } => {
            let color: SignalColor = parse_value("signal color", &color)?;
            write(config, |current| {
                if !current.signal_status.contains_key(&pole) {
                    return Err(anyhow!("unknown pole '{pole}'"));
                }
                let mut status = current.signal_status.clone();
                status.insert(pole.clone(), color);
                Ok(StatePatch::signal_status(status))
            })
            .await?;
        }
    }

    Ok(())
}

/// Publish an edit of the current document through a short-lived engine,
/// retrying transient failures.
async fn write<F>(config: AppConfig, edit: F) -> Result<()>
where
    F: FnOnce(&StateDocument) -> Result<StatePatch>,
{
    let engine = SyncEngine::from_config(config.client)?;
    engine.start().await?;
    engine.stop();

    let patch = edit(&engine.current())?;

    let result = with_retry(&RetryPolicy::default(), || engine.publish(patch.clone())).await;
    match result {
        Ok(doc) => {
            println!("{} Saved", "✓".green());
            print_document(&doc);
            Ok(())
        }
        Err(err) => {
            eprintln!("{} Failed to save: {}", "✗".red(), err);
            Err(err).context("state was not saved")
        }
    }
}

fn parse_value<T: DeserializeOwned>(what: &str, raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
        .map_err(|_| anyhow!("invalid {what} '{raw}'"))
}

fn print_document(doc: &StateDocument) {
    println!(
        "{} mode={} by={} at={}",
        "↔".bright_blue(),
        format!("{:?}", doc.control_mode).to_lowercase().bright_yellow(),
        doc.last_updated_by.bright_white(),
        doc.last_updated
    );
    for (pole, color) in &doc.signal_status {
        let label = match color {
            SignalColor::Red => "red".red(),
            SignalColor::Yellow => "yellow".yellow(),
            SignalColor::Green => "green".green(),
        };
        println!("    {pole}: {label}");
    }
}
