use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "marlin", version, about = "Multi-strategy crypto trading bot")]
pub struct Cli {
    /// Configuration directory (default.toml plus environment overlays)
    #[arg(long, default_value = "config", global = true)]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the trading loop, paper or live per configuration
    Run,

    /// Replay recent history through the engine and report performance
    Backtest {
        /// Candles to fetch per pair
        #[arg(long, default_value_t = 1000)]
        limit: usize,

        /// Start of the replay window (RFC 3339, e.g. 2026-07-01T00:00:00Z)
        #[arg(long)]
        from: Option<chrono::DateTime<chrono::Utc>>,

        /// End of the replay window (RFC 3339)
        #[arg(long)]
        to: Option<chrono::DateTime<chrono::Utc>>,
    },
}
