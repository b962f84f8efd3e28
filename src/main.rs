//! bundlevault - Main entry point
//!
//! Thin CLI shell around the engine library: parse arguments, resolve the
//! vault once, dispatch, print. Exit codes: 0 on success (including applies
//! that recorded `status=fail` - those are outcomes, not errors), 1 on any
//! caught error, 130 when an interrupt arrived during the run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use bundlevault::apply::{apply_bundle, plan_bundle, ApplyMode, ApplyOptions};
use bundlevault::cli::{BundleCommands, Cli, Commands};
use bundlevault::import::{import_bundle, ImportOptions};
use bundlevault::query::{list_bundles, show_manifest};
use bundlevault::vault::{ConflictPolicy, Vault};

/// Initialize tracing with env-filter support (`RUST_LOG` overrides).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    debug!("bundlevault starting up");

    // SIGINT propagates to running children through normal process-group
    // semantics; we only note it here so the final exit code can be 130.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!("failed to install interrupt handler: {e}");
        }
    }

    let cli = Cli::parse_args();
    let result = run(cli);

    if interrupted.load(Ordering::SeqCst) {
        info!("interrupted");
        std::process::exit(130);
    }
    if let Err(e) = result {
        error!("{e:#}");
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Commands::Bundle { bundle } = cli.command;
    match bundle {
        BundleCommands::Import {
            archive,
            vault,
            tags,
            on_conflict,
        } => run_import(&archive, vault, tags, on_conflict),
        BundleCommands::List { vault } => run_list(vault),
        BundleCommands::Show { bundle_id, vault } => run_show(&bundle_id, vault),
        BundleCommands::Plan {
            bundle_id,
            target,
            vault,
        } => run_plan(&bundle_id, &target, vault),
        BundleCommands::Apply {
            bundle_id,
            target,
            mode,
            force,
            timeout_secs,
            vault,
        } => run_apply(&bundle_id, &target, mode, force, timeout_secs, vault),
    }
}

fn run_import(
    archive: &PathBuf,
    vault: Option<PathBuf>,
    tags: Vec<String>,
    on_conflict: ConflictPolicy,
) -> anyhow::Result<()> {
    let vault = Vault::resolve(vault.as_deref())?;
    let outcome = import_bundle(&vault, archive, &ImportOptions { tags, on_conflict })
        .with_context(|| format!("importing {}", archive.display()))?;
    println!("Imported bundle: {}", outcome.bundle_id);
    println!("Stored at: {}", outcome.store_dir.display());
    println!("Receipt: {}", outcome.receipt_path.display());
    Ok(())
}

fn run_list(vault: Option<PathBuf>) -> anyhow::Result<()> {
    let vault = Vault::resolve(vault.as_deref())?;
    let entries = list_bundles(&vault)?;
    if entries.is_empty() {
        println!("No bundles found.");
        return Ok(());
    }
    for entry in entries {
        println!("- {}  ({})", entry.bundle_id, entry.store_dir.display());
    }
    Ok(())
}

fn run_show(bundle_id: &str, vault: Option<PathBuf>) -> anyhow::Result<()> {
    let vault = Vault::resolve(vault.as_deref())?;
    print!("{}", show_manifest(&vault, bundle_id)?);
    Ok(())
}

fn run_plan(bundle_id: &str, target: &PathBuf, vault: Option<PathBuf>) -> anyhow::Result<()> {
    let vault = Vault::resolve(vault.as_deref())?;
    let plan = plan_bundle(&vault, bundle_id, target)?;
    println!("== bundle plan ==");
    println!("bundle: {}", plan.bundle_id);
    println!("store: {}", plan.store_dir.display());
    println!("target: {}", plan.target.display());
    println!("target_exists: {}", plan.target_exists);
    println!("target_is_git: {}", plan.target_is_git);
    println!("entrypoint: {}", plan.entrypoint);
    println!(
        "verification: {}",
        plan.verification.as_deref().unwrap_or("(none)")
    );
    println!("NOTE: plan is informational only (no diff).");
    Ok(())
}

fn run_apply(
    bundle_id: &str,
    target: &PathBuf,
    mode: ApplyMode,
    force: bool,
    timeout_secs: u64,
    vault: Option<PathBuf>,
) -> anyhow::Result<()> {
    let vault = Vault::resolve(vault.as_deref())?;
    let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
    let options = ApplyOptions {
        mode,
        force,
        timeout,
        ..ApplyOptions::default()
    };
    let outcome = apply_bundle(&vault, bundle_id, target, &options)
        .with_context(|| format!("applying {bundle_id} to {}", target.display()))?;
    println!("Apply status: {}", outcome.status);
    println!("Receipt: {}", outcome.receipt_path.display());
    Ok(())
}
