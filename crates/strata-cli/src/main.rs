//! Strata storage CLI.
//!
//! Operator tooling for the directories a Strata log lives in.
//!
//! # Quick Start
//!
//! ```bash
//! # What does the filesystem under the data directory support?
//! strata probe ./data
//!
//! # Where does the real data in an open segment end?
//! strata inspect ./data open-1 --offset 4096
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use strata_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

/// Strata - storage tooling for the replicated log.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding strata.toml and strata.local.toml.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe direct and asynchronous I/O support of a directory.
    Probe {
        /// Directory to probe (created if missing). Defaults to the configured data directory.
        dir: Option<PathBuf>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Report whether a file's tail is zero-filled pre-allocated space.
    Inspect {
        /// Directory containing the file.
        dir: PathBuf,

        /// File name within the directory.
        file: String,

        /// Offset the real data ends at.
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Parse a peer address (host, host:port, [v6] or [v6]:port).
    ParseAddr {
        address: String,

        /// Port used when the address has none.
        #[arg(long, default_value_t = strata_io::DEFAULT_PORT)]
        default_port: u16,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(dir) = &cli.project_dir {
        loader = loader.with_project_dir(dir);
    }
    let config_files = loader.config_files();
    let config = loader.load();

    // Initialize logging
    let level = config
        .as_ref()
        .map_or("info", |c| c.logging.level.as_str());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Commands::Probe { dir, json } => commands::probe::run(&config?, dir, json),
        Commands::Inspect { dir, file, offset } => commands::inspect::run(dir, &file, offset),
        Commands::ParseAddr {
            address,
            default_port,
        } => commands::addr::run(&address, default_port),
        Commands::Config => commands::config::show(&config?, &config_files),
    }
}
