//! markerctl: command-line client for the marker hub.

mod cli;
mod hub_client;

use std::time::Duration;

use clap::Parser;
use shared::AddMarkerEvent;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `dump` output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Watch { once } => {
            hub_client::watch(&cli.url, once).await?;
        }
        cli::Commands::Dump { idle_ms } => {
            hub_client::dump(&cli.url, Duration::from_millis(idle_ms)).await?;
        }
        cli::Commands::Add {
            name,
            description,
            lat,
            lon,
        } => {
            let event = AddMarkerEvent::new(name, description, lat, lon);
            hub_client::add_marker(&cli.url, &event).await?;
            println!("Marker sent.");
        }
    }

    Ok(())
}
