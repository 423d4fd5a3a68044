//! # Buildshelf - Build Library Manager
//!
//! Keeps a local library of application builds organised by branch, and runs
//! every slow operation on it (downloads, scans, removals, renames, template
//! installs, remote listing scrapes) on a fixed-size pool of background
//! workers.
//!
//! ## Usage
//!
//! ```bash
//! # List installed builds
//! buildshelf --library ~/builds scan
//!
//! # Fetch an archive into the staging folder, then install it
//! buildshelf --library ~/builds download https://example.org/blender-4.1.0-linux-x64.tar.xz
//! buildshelf -l ~/builds extract ~/builds/.temp/blender-4.1.0-linux-x64.tar.xz -b stable
//!
//! # See what is available remotely
//! buildshelf --library ~/builds scrape --channel daily
//!
//! # Purge unfinished downloads and trashed builds
//! buildshelf --library ~/builds clean
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use buildshelf::commands::{
    clean::CleanCommand, download::DownloadCommand, extract::ExtractCommand,
    remove::RemoveCommand, rename::RenameCommand, scan::ScanCommand, scrape::ScrapeCommand,
    template::TemplateCommand,
};
use buildshelf::config::Config;
use buildshelf::library::Branch;
use buildshelf::tasks::DeleteAction;

/// Buildshelf - manage a local library of application builds
#[derive(Parser)]
#[command(
    name = "buildshelf",
    about = "Manage a local library of application builds",
    long_about = "Downloads, scans, removes and renames builds in a branch-organised library using a pool of background workers.",
    version
)]
struct Cli {
    /// Library folder (defaults to ./library)
    #[arg(long, short = 'l', global = true, env = "BUILDSHELF_LIBRARY")]
    library: Option<PathBuf>,
    /// Number of background workers
    #[arg(long, short = 'j', global = true, env = "BUILDSHELF_WORKERS")]
    workers: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// List installed builds, flagging folders that are not builds
    Scan {
        /// Only scan these branches (stable, daily, experimental, fork, custom)
        #[arg(long = "branch", short = 'b')]
        branches: Vec<Branch>,
    },
    /// Download build archives into the staging folder
    Download {
        /// Archive URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Unpack downloaded archives (.zip, .tar, .tar.gz, .tar.xz) into a branch folder
    Extract {
        /// Archive files
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        /// Branch folder to install into
        #[arg(long, short = 'b', default_value = "stable")]
        branch: Branch,
    },
    /// Delete or trash installed builds
    Remove {
        /// Build folders to remove
        #[arg(required = true)]
        builds: Vec<PathBuf>,
        /// trash or permanent (defaults to BUILDSHELF_DELETE_ACTION, then trash)
        #[arg(long, short = 'a')]
        action: Option<DeleteAction>,
    },
    /// Rename a build folder from a display name
    Rename {
        /// Build folder to rename
        build: PathBuf,
        /// New display name; lowercased with spaces turned into hyphens
        name: String,
    },
    /// Copy the library template into builds
    Template {
        /// Build folders to install the template into
        #[arg(required = true)]
        builds: Vec<PathBuf>,
    },
    /// Remove unfinished downloads and trashed builds
    Clean,
    /// List builds available from the remote listing
    Scrape {
        /// Only fetch these channels (stable, daily, experimental, fork)
        #[arg(long = "channel", short = 'c')]
        channels: Vec<Branch>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildshelf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(library) = cli.library {
        config.library_folder = library;
    }
    if let Some(workers) = cli.workers {
        config.worker_count = workers.max(1);
    }
    info!(
        "Using library {:?} with {} workers",
        config.library_folder, config.worker_count
    );

    let result = match cli.command {
        Commands::Scan { branches } => ScanCommand::new(config, branches).execute().await,
        Commands::Download { urls } => DownloadCommand::new(config, urls).execute().await,
        Commands::Extract { archives, branch } => {
            ExtractCommand::new(config, archives, branch).execute().await
        }
        Commands::Remove { builds, action } => {
            RemoveCommand::new(config, builds, action).execute().await
        }
        Commands::Rename { build, name } => RenameCommand::new(config, build, name).execute().await,
        Commands::Template { builds } => TemplateCommand::new(config, builds).execute().await,
        Commands::Clean => CleanCommand::new(config).execute().await,
        Commands::Scrape { channels } => ScrapeCommand::new(config, channels).execute().await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
