//! CLI argument parsing.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "markerctl")]
#[command(about = "Marker hub client: watch, dump and submit markers")]
pub struct Cli {
    /// Hub WebSocket URL
    #[arg(
        long,
        global = true,
        env = "MARKER_HUB_URL",
        default_value = "ws://localhost:5000"
    )]
    pub url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every marker received, snapshot first then live
    Watch {
        /// Exit when the connection ends instead of reconnecting
        #[arg(long)]
        once: bool,
    },

    /// Print the stored markers as a JSON array and exit
    Dump {
        /// Stop collecting after this long without a message
        #[arg(long, default_value_t = 500)]
        idle_ms: u64,
    },

    /// Submit one marker
    Add {
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
}
