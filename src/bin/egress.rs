//! Veilgate egress relay
//!
//! Accepts encrypted tunnels from local relays, decrypts the request carried
//! in each one, fetches it from the target server and streams the response
//! back as encrypted chunks.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use veilgate::{
    config::{generate_example_config, EgressConfig},
    crypto::{EgressKeyPair, RSA_KEY_BITS},
    relay::{Acceptor, EgressRelay},
    Config,
};

/// Veilgate egress relay - internet-facing end of the encrypted tunnel
#[derive(Parser, Debug)]
#[command(name = "veilgate-egress")]
#[command(about = "Veilgate egress relay - internet-facing end of the encrypted tunnel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

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

    let mut egress: EgressConfig = config.egress.unwrap_or_default();
    if let Some(listen) = args.listen {
        egress.listen = listen;
    }

    info!("Veilgate egress relay v{}", veilgate::VERSION);
    info!("Generating {}-bit RSA key pair...", RSA_KEY_BITS);
    let keys = tokio::task::spawn_blocking(EgressKeyPair::generate)
        .await
        .context("Key generation task failed")?
        .context("Failed to generate relay key pair")?;
    info!("Relay public key fingerprint: {}", keys.fingerprint());

    let acceptor = Acceptor::bind(&egress.listen, "egress")
        .await
        .context("Failed to bind to address")?;

    let relay = EgressRelay::new(Arc::new(keys), egress, logging.log_traffic);
    relay
        .serve(acceptor, async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await;

    Ok(())
}
