//! subrelay CLI - drive the DHCP relay engine from the command line.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use subrelay::{RelayConfig, RelayEngine};

const DEFAULT_CONFIG_PATH: &str = "/etc/subrelay.conf";

#[derive(Parser)]
#[command(name = "subrelay")]
#[command(about = "DHCP relay agent - bring subscribers up and down")]
struct Cli {
    /// Path to the relay configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Upstream DHCP server address (overrides the config file)
    #[arg(long)]
    server: Option<Ipv4Addr>,

    /// Relay (giaddr) address (overrides the config file)
    #[arg(long)]
    relay: Option<Ipv4Addr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring a subscriber up and print its assigned address
    Up {
        /// Subscriber MAC address (any separator style)
        mac: String,
        /// Specific address to request instead of the configured dummy
        #[arg(long)]
        ip: Option<String>,
        /// Seconds to wait for the subscriber to come up
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Release a subscriber
    Down {
        /// Subscriber MAC address
        mac: String,
    },
    /// Bulk-activate subscribers listed in a file, one MAC per line
    Bulk {
        /// File of MAC addresses; blank lines and # comments are skipped
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = if cli.config.exists() {
        RelayConfig::load(&cli.config).context("loading configuration")?
    } else if let (Some(server), Some(relay)) = (cli.server, cli.relay) {
        RelayConfig::new(server, relay)
    } else {
        bail!(
            "config file {} not found; pass --server and --relay to run without one",
            cli.config.display()
        );
    };
    if let Some(server) = cli.server {
        config.server_ip = server;
    }
    if let Some(relay) = cli.relay {
        config.relay_ip = relay;
    }

    let engine = Arc::new(RelayEngine::new(config)?);
    let _listeners = engine.start();

    let code = match cli.command {
        Commands::Up { mac, ip, timeout } => {
            match engine.bring_subscriber_up(&mac, ip.as_deref(), timeout.map(Duration::from_secs))
            {
                Ok(assigned) => {
                    println!("{} up with {}", mac, assigned);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Down { mac } => {
            engine.bring_subscriber_down(&mac);
            println!("released {}", mac);
            ExitCode::SUCCESS
        }
        Commands::Bulk { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let macs: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .collect();
            let count = macs.len();
            engine.bring_subscribers_up(macs);
            println!("dispatched {} discover requests", count);
            ExitCode::SUCCESS
        }
    };

    engine.shutdown();
    Ok(code)
}
