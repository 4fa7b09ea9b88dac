//! Command-line surface (spec §6 External Interfaces).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "goblin", version, about = "MCP aggregation gateway")]
pub struct Cli {
    /// Minimum log level (overridden by `LOG_LEVEL`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts the gateway and serves upstream-aggregated MCP over Streamable-HTTP.
    Run {
        #[arg(long, env = "GOBLIN_CONFIG_PATH")]
        config: PathBuf,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Parses and validates a config file without starting the gateway.
    Validate {
        #[arg(long, env = "GOBLIN_CONFIG_PATH")]
        config: PathBuf,
    },
}
