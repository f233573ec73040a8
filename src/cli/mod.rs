pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a batch of products
    Scan {
        /// ASINs or full product URLs
        targets: Vec<String>,

        /// File with one ASIN or URL per line
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Configuration profile to use
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Override the worker pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Scan at most this many items
        #[arg(short, long)]
        limit: Option<usize>,

        /// Use the plain fetcher even if the profile enables stealth
        #[arg(long)]
        basic: bool,

        /// Write the full JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available configuration profiles
    Profiles,

    /// Show a configuration profile, creating it if missing
    Profile {
        /// Profile name
        #[arg(required = true)]
        name: String,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scan {
            targets,
            input,
            profile,
            workers,
            limit,
            basic,
            output,
        } => commands::scan(targets, input, profile, workers, limit, basic, output).await,
        Commands::Profiles => commands::list_profiles().await,
        Commands::Profile { name } => commands::manage_profile(name).await,
    }
}
