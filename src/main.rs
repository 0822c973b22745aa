use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bgp_radar::config::Config;
use bgp_radar::Radar;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    info!("bgp-radar starting...");

    if let Err(e) = Radar::new(config).run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
