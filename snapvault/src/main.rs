//! snapvault - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapvault::{config::BackupConfig, executor::BackupExecutor, prune, restore, snapshot, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a backup described by a TOML configuration file
    Backup {
        /// Path to configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// List complete snapshots for a project
    List {
        #[arg(short, long)]
        project: String,

        /// Directory holding the project's archives
        #[arg(short, long, value_name = "DIR")]
        destination: PathBuf,
    },
    /// Delete all but the newest snapshots for a project
    Prune {
        #[arg(short, long)]
        project: String,

        #[arg(short, long, value_name = "DIR")]
        destination: PathBuf,

        /// How many snapshots to retain
        #[arg(short, long)]
        keep: usize,
    },
    /// Extract a snapshot archive
    Restore {
        /// Archive to extract
        #[arg(short, long, value_name = "FILE")]
        archive: PathBuf,

        /// Directory to extract into
        #[arg(short, long, value_name = "DIR")]
        to: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::logger::init(&args.log_level);

    tracing::info!("snapvault v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Backup { config } => {
            let config = BackupConfig::from_file(&config)?;
            let snapshot = BackupExecutor::new().run(&config).await?;
            println!("{}", snapshot.archive_path.display());
        }
        Command::List {
            project,
            destination,
        } => {
            for entry in snapshot::list_snapshots(&project, &destination)? {
                println!(
                    "{}  {} files  {} bytes",
                    entry.stem, entry.manifest.file_count, entry.manifest.total_bytes
                );
            }
        }
        Command::Prune {
            project,
            destination,
            keep,
        } => {
            let deleted = prune::prune(&project, &destination, keep)?;
            for stem in &deleted {
                println!("deleted {stem}");
            }
            tracing::info!("pruned {} snapshot(s)", deleted.len());
        }
        Command::Restore { archive, to } => {
            let manifest = restore::restore_archive(&archive, &to).await?;
            tracing::info!(
                "restored {} file(s) from {}",
                manifest.file_count,
                archive.display()
            );
        }
    }

    Ok(())
}
