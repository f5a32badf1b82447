use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rxd-stratum",
    version,
    about = "Solo-mining Stratum V1 relay with optional merged mining",
    long_about = "A solo-mining Stratum V1 relay that translates miner shares into \
                 chain-valid blocks against one or two full-node daemons, \
                 including AuxPoW merged mining."
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (json, compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay
    Start {
        /// Miner-facing bind address (overrides config file)
        #[arg(short, long)]
        bind: Option<String>,

        /// Primary node RPC URL (overrides config file)
        #[arg(long)]
        rpc_url: Option<String>,

        /// Primary node RPC user (overrides config file)
        #[arg(long)]
        rpc_user: Option<String>,

        /// Primary node RPC password (overrides config file)
        #[arg(long)]
        rpc_pass: Option<String>,

        /// Preconfigured payout address (overrides config file)
        #[arg(long)]
        payout: Option<String>,

        /// Advertise the easier chain target to miners
        #[arg(long)]
        use_easier_target: bool,
    },

    /// Validate a configuration file
    Config {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Generate an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "rxd-stratum.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
