//! localpipe - Demo Host and Client
//!
//! Runs either end of an authenticated loopback pipe from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Terminal 1: print everything clients send
//! localpipe host --authkey s3cret
//!
//! # Terminal 2: send the three demo values, then stop
//! localpipe client --authkey s3cret
//!
//! # Send your own values (JSON, or plain text as a string)
//! localpipe client --authkey s3cret 42 '[1, 2]' '{"k": true}' hello
//!
//! # Verbose logging
//! RUST_LOG=localpipe_core=debug localpipe host
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): the host sets its cancellation flag and exits within
//!   one cycle time

mod client;
mod host;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use localpipe_core::{load_config_from_path, AuthKey, PipeConfig};

/// Authenticated loopback messaging between local processes
#[derive(Parser, Debug)]
#[command(name = "localpipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "LOCALPIPE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for clients and print every value they send
    Host(host::HostArgs),
    /// Connect to a host and send values
    Client(client::ClientArgs),
}

/// Settings shared by both subcommands
#[derive(Args, Debug)]
struct PipeArgs {
    /// Loopback port (overrides config file and LOCALPIPE_PORT)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Shared secret, as UTF-8 text (falls back to LOCALPIPE_AUTHKEY)
    #[arg(short = 'k', long)]
    authkey: Option<String>,

    /// Shared secret, hex-encoded (as printed by a host that generated one); wins over --authkey
    #[arg(long, value_name = "HEX")]
    authkey_hex: Option<String>,

    /// Cycle time in milliseconds (bounds shutdown latency)
    #[arg(long, value_name = "MS")]
    cycle_time_ms: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "LOCALPIPE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

impl PipeArgs {
    /// File, then environment, then these flags
    fn load_config(&self) -> Result<PipeConfig> {
        let mut config = load_config_from_path(self.config.clone())
            .context("Failed to load configuration")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cycle_time_ms) = self.cycle_time_ms {
            config.cycle_time_ms = cycle_time_ms;
        }
        config.validate().context("Invalid command-line settings")?;
        Ok(config)
    }

    /// The key given on the command line or in the environment, if any
    fn authkey(&self) -> Result<Option<AuthKey>> {
        if let Some(hex) = &self.authkey_hex {
            return AuthKey::from_hex(hex)
                .map(Some)
                .context("Invalid --authkey-hex");
        }
        match self.authkey.as_deref() {
            Some(text) => AuthKey::new(text.as_bytes().to_vec())
                .map(Some)
                .context("Invalid --authkey"),
            None => Ok(AuthKey::from_env()),
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("localpipe={level},localpipe_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "localpipe starting");

    match cli.command {
        Command::Host(args) => host::run(args).await,
        Command::Client(args) => client::run(args).await,
    }
}
