//! Veilgate local relay
//!
//! Listens for plain-HTTP proxy requests from a browser and carries each one
//! to the egress relay inside a freshly keyed encrypted tunnel.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};
use veilgate::{
    config::{generate_example_config, LocalConfig},
    relay::{Acceptor, LocalRelay},
    Config,
};

/// Veilgate local relay - browser-facing end of the encrypted tunnel
#[derive(Parser, Debug)]
#[command(name = "veilgate-local")]
#[command(about = "Veilgate local relay - browser-facing end of the encrypted tunnel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Egress relay address (overrides config)
    #[arg(short, long)]
    egress: Option<String>,

    /// Log level (overrides config; RUST_LOG wins over both)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let example = toml::to_string_pretty(&generate_example_config())
            .context("Failed to render example config")?;
        println!("{}", example);
        return Ok(());
    }

    let (config, loaded) = if Path::new(&args.config).exists() {
        (
            Config::load(&args.config).context("Failed to load configuration")?,
            true,
        )
    } else {
        (Config::default(), false)
    };

    let mut logging = config.logging.clone();
    if let Some(level) = args.log_level {
        logging.level = level;
    }
    logging.init();

    if !loaded {
        warn!("Config file {} not found, using defaults", args.config);
    }

    let mut local: LocalConfig = config.local.unwrap_or_default();
    if let Some(listen) = args.listen {
        local.listen = listen;
    }
    if let Some(egress) = args.egress {
        local.egress = egress;
    }

    info!("Veilgate local relay v{}", veilgate::VERSION);
    info!("Forwarding through egress relay at {}", local.egress);

    let acceptor = Acceptor::bind(&local.listen, "local")
        .await
        .context("Failed to bind to address")?;

    let relay = LocalRelay::new(local, logging.log_traffic);
    relay
        .serve(acceptor, async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await;

    Ok(())
}
