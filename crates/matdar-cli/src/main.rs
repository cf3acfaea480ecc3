//! # Matdar CLI
//!
//! Command-line host for the Matdar offline voter roll.
//!
//! ## Commands
//!
//! - `matdar status` - Show availability, provenance and sync state
//! - `matdar sync` - Run one refresh cycle against the remote store
//! - `matdar search <text>` - Search the roll in either script
//! - `matdar import <file>` - Load an ingestion export into the local cache
//! - `matdar booths` - List booth numbers
//! - `matdar watch` - Keep the cache fresh in the foreground
//! - `matdar clear` - Remove all cached data
//!
//! ## Example Usage
//!
//! ```bash
//! # Load the roll exported by the ingestion service
//! matdar import roll.json
//!
//! # Devanagari and Latin queries find the same people
//! matdar search "राम" --booth 5
//! matdar search "ram patil" --station school
//!
//! # One query per line, coalesced like keystrokes
//! matdar search --interactive --booth 5
//! ```

mod app;
mod commands;
mod labels;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Matdar - Offline voter roll search
#[derive(Parser)]
#[command(name = "matdar")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "MATDAR_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show availability, provenance and sync state
    Status,

    /// Run one refresh cycle now
    Sync,

    /// Search the roll
    #[command(alias = "s")]
    Search {
        /// Search text; every whitespace-separated term must match
        #[arg(default_value = "")]
        text: String,

        /// Only show these booths (can be used multiple times)
        #[arg(short, long)]
        booth: Vec<String>,

        /// Only show records whose polling station contains this text
        #[arg(short = 's', long)]
        station: Option<String>,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Results per page (0 = configured default)
        #[arg(long, default_value = "0")]
        page_size: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,

        /// Read one query per line from stdin, searching as lines settle
        #[arg(short, long)]
        interactive: bool,
    },

    /// Load an ingestion-service JSON export into the local cache
    Import {
        /// JSON file: an array of records or an object with a records array
        file: PathBuf,
    },

    /// List booth numbers of the active dataset
    Booths,

    /// Run the sync scheduler and connectivity monitor in the foreground
    Watch {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Clear all cached data
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => matdar_core::Config::load_from(path)?,
        None => matdar_core::Config::load()?,
    };

    // Setup logging
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.general.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    // Execute command
    match cli.command {
        Commands::Status => commands::status::run(config),
        Commands::Sync => commands::sync::run(config),
        Commands::Search {
            text,
            booth,
            station,
            page,
            page_size,
            output,
            interactive,
        } => commands::search::run(
            config,
            commands::search::SearchArgs {
                text,
                booths: booth,
                station,
                page,
                page_size,
                output,
                interactive,
            },
        ),
        Commands::Import { file } => commands::import::run(config, &file),
        Commands::Booths => commands::booths::run(config),
        Commands::Watch { duration } => commands::watch::run(config, duration),
        Commands::Clear { yes } => commands::clear::run(config, yes),
    }
}
