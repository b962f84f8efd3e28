use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::apply::ApplyMode;
use crate::vault::ConflictPolicy;

/// bundlevault - content-tracked bundle import/apply engine
#[derive(Parser)]
#[command(name = "bundlevault")]
#[command(about = "Import self-describing bundles into a local vault and apply them to targets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bundle import/list/show/plan/apply
    Bundle {
        #[command(subcommand)]
        bundle: BundleCommands,
    },
}

#[derive(Subcommand)]
pub enum BundleCommands {
    /// Import a bundle archive (tar.gz with a root manifest.json) into the vault
    Import {
        /// Path to the bundle archive
        archive: PathBuf,
        /// Vault root override (default: $BUNDLEVAULT_HOME, then ~/.bundlevault)
        #[arg(long)]
        vault: Option<PathBuf>,
        /// Optional tags to attach to this import (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// What to do when the bundle id already occupies the current partition
        #[arg(long, value_enum, default_value_t)]
        on_conflict: ConflictPolicy,
    },
    /// List imported bundles, newest manifest first
    List {
        /// Vault root override
        #[arg(long)]
        vault: Option<PathBuf>,
    },
    /// Show a stored bundle's manifest
    Show {
        /// Bundle ID
        bundle_id: String,
        /// Vault root override
        #[arg(long)]
        vault: Option<PathBuf>,
    },
    /// Preview applying a bundle to a target directory (informational only)
    Plan {
        /// Bundle ID
        bundle_id: String,
        /// Target directory
        #[arg(long)]
        target: PathBuf,
        /// Vault root override
        #[arg(long)]
        vault: Option<PathBuf>,
    },
    /// Apply a bundle's entrypoint to a target directory and record a receipt
    Apply {
        /// Bundle ID
        bundle_id: String,
        /// Target directory (created if missing)
        #[arg(long)]
        target: PathBuf,
        /// Execution gate label, recorded in logs and the receipt only
        #[arg(long, value_enum, default_value_t)]
        mode: ApplyMode,
        /// Pass --force to the bundle entrypoint
        #[arg(long)]
        force: bool,
        /// Per-subprocess timeout in seconds; 0 disables the bound
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
        /// Vault root override
        #[arg(long)]
        vault: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
