//! SysEx Bridge
//!
//! Drives a DAW host over virtual MIDI cables with SysEx-framed JSON commands.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use sysex_bridge::bridge::Bridge;
use sysex_bridge::config::AppConfig;
use sysex_bridge::transport::MidirBackend;

/// SysEx Bridge - send commands to a DAW host over MIDI SysEx
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Send one command, e.g. `send set_tempo bpm=140`
    Send {
        /// Command name (see `commands` in the REPL) or 0x id
        name: String,

        /// Parameters as key=value
        params: Vec<String>,

        /// Do not wait for the host's response
        #[arg(long)]
        no_wait: bool,

        /// Response timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print async updates and other unsolicited messages
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting SysEx Bridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load_or_default(&args.config).await?;

    if args.list_ports {
        cli::list_ports_formatted(&MidirBackend::default(), &config.midi);
        return Ok(());
    }

    let bridge = Arc::new(Bridge::connect(&config)?);

    let outcome = match args.command {
        Some(Cmd::Send {
            name,
            params,
            no_wait,
            timeout_ms,
        }) => {
            let request = cli::SendRequest {
                command: cli::parse_command(&name)?,
                params: cli::parse_params(&params)?,
                wait: !no_wait,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            cli::run_send(bridge.clone(), request).await.map(|_| ())
        }
        Some(Cmd::Watch) => cli::watch(bridge.clone(), shutdown_signal()).await.map(|_| ()),
        None => cli::run_repl(bridge.clone()).await,
    };

    bridge.shutdown();
    info!("SysEx Bridge shutdown complete");
    outcome
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
