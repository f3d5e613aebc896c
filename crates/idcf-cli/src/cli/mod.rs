//! CLI for the idcf bulk series fetcher.

mod commands;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use idcf_core::config;
use std::path::PathBuf;

use commands::{run_download, run_validate, DownloadArgs, ValidateArgs};

/// Top-level CLI for the idcf bulk series fetcher.
#[derive(Debug, Parser)]
#[command(name = "idcf")]
#[command(about = "idcf: bulk DICOM series download and validation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download series from the object store into a local tree.
    #[command(group = ArgGroup::new("input").required(true).args(["collection", "uids", "query", "manifest"]))]
    Download {
        /// Download every series of a collection (requires --index).
        #[arg(long, value_name = "ID")]
        collection: Option<String>,

        /// Download specific series by instance UID (requires --index).
        #[arg(long, value_name = "UID", num_args = 1..)]
        uids: Vec<String>,

        /// Index filter query, e.g. 'collection_id=nlst Modality=CT'
        /// (requires --index).
        #[arg(long, value_name = "EXPR")]
        query: Option<String>,

        /// Manifest file: one locator per line, or tabular with a series column.
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,

        /// Destination root directory.
        #[arg(long, short, value_name = "DIR")]
        output: PathBuf,

        /// CSV series index used to resolve collections and UIDs.
        #[arg(long, value_name = "FILE")]
        index: Option<PathBuf>,

        /// Series per batch (overrides the config value).
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// Concurrent transfers within a batch (overrides the config value).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Resolve the input and report the size estimate without transferring.
        #[arg(long)]
        dry_run: bool,

        /// Ignore any existing checkpoint and start from scratch.
        #[arg(long)]
        no_resume: bool,
    },

    /// Validate a downloaded tree: parse every file, check counts and
    /// optionally cross-slice geometry.
    Validate {
        /// Root directory of the downloaded tree.
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,

        /// Manifest the tree was downloaded from; supplies expected instance
        /// counts and flags series that never arrived.
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,

        /// Also check cross-slice geometry of volumetric series (CT/MR/PT).
        #[arg(long)]
        check_geometry: bool,

        /// Write the JSON report to this path.
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Concurrent series validations (overrides the config value).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
    },
}

impl CliCommand {
    /// Dispatch the parsed command; the returned code is the process exit
    /// status (0 success, 2 completed with failures, 3 aborted).
    pub async fn run_from_args() -> Result<i32> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Download {
                collection,
                uids,
                query,
                manifest,
                output,
                index,
                batch_size,
                jobs,
                dry_run,
                no_resume,
            } => {
                run_download(
                    DownloadArgs {
                        collection,
                        uids,
                        query,
                        manifest,
                        output,
                        index,
                        batch_size,
                        jobs,
                        dry_run,
                        no_resume,
                    },
                    cfg,
                )
                .await
            }
            CliCommand::Validate {
                dir,
                manifest,
                check_geometry,
                output,
                jobs,
            } => {
                run_validate(
                    ValidateArgs {
                        dir,
                        manifest,
                        check_geometry,
                        output,
                        jobs,
                    },
                    cfg,
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests;
