//! Apply Pipeline
//!
//! Extracts a stored bundle into a uniquely named scratch directory, executes
//! its declared entrypoint against a target directory, optionally runs the
//! declared verification script, and records the outcome as an apply receipt.
//!
//! Failure semantics are deliberately split:
//! - Resolution failures (unknown bundle, missing stored archive, missing
//!   entrypoint) are fatal precondition errors. No receipt is written.
//! - A non-zero exit from the entrypoint or the verification script is a
//!   normal, recorded outcome. The receipt gets `status=fail` and the call
//!   returns `Ok`.
//!
//! The scratch directory is a `tempfile::TempDir`, so extraction collateral
//! is removed on every exit path, including the fatal ones.
//!
//! Within one apply, the entrypoint always completes (or is recorded as
//! failed) before verification starts; verification never runs when
//! extraction or entrypoint resolution failed.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::archive::{extract_to, STORED_ARCHIVE_NAME};
use crate::error::{EngineError, Result};
use crate::ledger::{
    new_run_id, ApplyLogs, ApplyReceipt, RunDir, RunStatus, VerifyRecord, APPLY_RECEIPT_FILE,
};
use crate::manifest::{BundleManifest, MANIFEST_FILE};
use crate::query::find_bundle_dir;
use crate::vault::Vault;

/// How long a child gets between SIGTERM and SIGKILL after a timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Child poll interval while waiting under a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Execution mode label. Recorded in logs and receipts only; it never alters
/// which actions execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[value(rename_all = "UPPER")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ApplyMode {
    Safe,
    #[default]
    Guided,
    All,
}

/// Caller-supplied apply options.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub mode: ApplyMode,
    pub force: bool,
    /// Upper bound on each subprocess. `None` disables the bound.
    pub timeout: Option<Duration>,
    /// Parent directory for the scratch extraction dir. Defaults to the
    /// system temp dir; must be outside the vault and the target.
    pub scratch_in: Option<PathBuf>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            mode: ApplyMode::default(),
            force: false,
            timeout: Some(Duration::from_secs(3600)),
            scratch_in: None,
        }
    }
}

/// What an apply run recorded.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub bundle_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub apply_exit: Option<i32>,
    pub verify_exit: Option<i32>,
    pub timed_out: bool,
    pub receipt_path: PathBuf,
}

/// Informational preview of an apply. No receipt, no side effects.
#[derive(Debug, Clone)]
pub struct PlanSummary {
    pub bundle_id: String,
    pub store_dir: PathBuf,
    pub target: PathBuf,
    pub target_exists: bool,
    pub target_is_git: bool,
    pub entrypoint: String,
    pub verification: Option<String>,
}

/// Result of one logged subprocess execution.
#[derive(Debug, Clone, Copy)]
struct ExecResult {
    exit_code: Option<i32>,
    timed_out: bool,
}

impl ExecResult {
    fn passed(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Run `bash <script> <args..>` with combined stdout/stderr captured to
/// `log_path`, after writing `header` lines into the log.
///
/// Timeout policy: SIGTERM on expiry, then SIGKILL after [`KILL_GRACE`]. A
/// timed-out child is recorded with no exit code.
fn run_logged(
    script: &Path,
    args: &[String],
    cwd: &Path,
    log_path: &Path,
    header: &[String],
    timeout: Option<Duration>,
) -> Result<ExecResult> {
    let mut log = File::create(log_path)?;
    for line in header {
        writeln!(log, "{line}")?;
    }
    writeln!(log)?;
    let stdout_log = log.try_clone()?;

    let mut child = Command::new("bash")
        .arg(script)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(log))
        .spawn()?;

    let Some(limit) = timeout else {
        let status = child.wait()?;
        return Ok(ExecResult {
            exit_code: status.code(),
            timed_out: false,
        });
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ExecResult {
                exit_code: status.code(),
                timed_out: false,
            });
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    warn!(script = %script.display(), "subprocess exceeded timeout, terminating");
    let pid = Pid::from_raw(child.id() as i32);
    let _ = signal::kill(pid, Signal::SIGTERM);
    let grace_deadline = Instant::now() + KILL_GRACE;
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if Instant::now() >= grace_deadline {
            child.kill()?;
            child.wait()?;
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Ok(ExecResult {
        exit_code: None,
        timed_out: true,
    })
}

/// Preview an apply without executing anything.
pub fn plan_bundle(vault: &Vault, bundle_id: &str, target: &Path) -> Result<PlanSummary> {
    let store_dir = find_bundle_dir(vault, bundle_id)?;
    let manifest = BundleManifest::from_slice(&std::fs::read(store_dir.join(MANIFEST_FILE))?)?;
    Ok(PlanSummary {
        bundle_id: bundle_id.to_string(),
        store_dir,
        target: target.to_path_buf(),
        target_exists: target.exists(),
        target_is_git: target.join(".git").exists(),
        entrypoint: manifest.entrypoint().to_string(),
        verification: manifest.verification_path().map(str::to_string),
    })
}

/// Apply a stored bundle to a target directory.
pub fn apply_bundle(
    vault: &Vault,
    bundle_id: &str,
    target: &Path,
    options: &ApplyOptions,
) -> Result<ApplyOutcome> {
    // Steps 1-2: resolve the bundle and require its stored archive.
    let store_dir = find_bundle_dir(vault, bundle_id)?;
    let archive_path = store_dir.join(STORED_ARCHIVE_NAME);
    if !archive_path.is_file() {
        return Err(EngineError::not_found(format!(
            "stored archive missing: {}",
            archive_path.display()
        )));
    }
    let manifest = BundleManifest::from_slice(&std::fs::read(store_dir.join(MANIFEST_FILE))?)?;

    // Step 3: the target must exist before the entrypoint sees it.
    std::fs::create_dir_all(target)?;

    // Step 4: extract into a uniquely named scratch dir outside the vault and
    // the target. Dropping `scratch` removes it on every exit path.
    let mut scratch_builder = tempfile::Builder::new();
    scratch_builder.prefix("bundlevault_apply_");
    let scratch = match &options.scratch_in {
        Some(parent) => scratch_builder.tempdir_in(parent)?,
        None => scratch_builder.tempdir()?,
    };
    extract_to(&archive_path, scratch.path())?;
    debug!(scratch = %scratch.path().display(), "extracted bundle");

    // Step 5: resolve the entrypoint inside the scratch tree.
    let entry_path = scratch.path().join(manifest.entrypoint());
    if !entry_path.is_file() {
        return Err(EngineError::not_found(format!(
            "entrypoint not found in bundle: {}",
            manifest.entrypoint()
        )));
    }

    // Step 6: allocate the run and its logs directory.
    let run = RunDir::create(vault, new_run_id(Utc::now()))?;
    let logs_dir = run.logs_dir()?;
    let apply_log = logs_dir.join("apply.log");

    // Step 7: execute the entrypoint from the scratch root.
    let mut entry_args = vec!["--target".to_string(), target.display().to_string()];
    if options.force {
        entry_args.push("--force".to_string());
    }
    let header = vec![
        format!("mode={}", options.mode),
        format!("bundle_id={bundle_id}"),
        format!("target={}", target.display()),
        format!(
            "cmd=bash {} {}",
            entry_path.display(),
            entry_args.join(" ")
        ),
    ];
    let apply_result = run_logged(
        &entry_path,
        &entry_args,
        scratch.path(),
        &apply_log,
        &header,
        options.timeout,
    )?;
    info!(
        bundle_id,
        exit = ?apply_result.exit_code,
        timed_out = apply_result.timed_out,
        "entrypoint finished"
    );

    // Step 8: optional verification, working directory set to the target.
    // Vacuously passing when undeclared.
    let mut verify = VerifyRecord::default();
    let mut verify_result: Option<ExecResult> = None;
    if let Some(verify_path) = manifest.verification_path() {
        let verify_log = logs_dir.join("verify.log");
        let header = vec![format!("cmd=bash {verify_path}")];
        let result = run_logged(
            Path::new(verify_path),
            &[],
            target,
            &verify_log,
            &header,
            options.timeout,
        )?;
        verify = VerifyRecord {
            path: Some(verify_path.to_string()),
            exit: result.exit_code,
            log: Some(verify_log.display().to_string()),
        };
        verify_result = Some(result);
    }

    // Step 9: pass iff the entrypoint passed and verification (if declared)
    // passed.
    let status = if apply_result.passed() && verify_result.map(|r| r.passed()).unwrap_or(true) {
        RunStatus::Pass
    } else {
        RunStatus::Fail
    };
    let timed_out = apply_result.timed_out || verify_result.map(|r| r.timed_out).unwrap_or(false);

    // Step 10: the receipt is the durable account of what happened.
    let receipt = ApplyReceipt {
        schema_version: 1,
        apply_id: format!("apply_{}", run.run_id()),
        applied_at: Utc::now(),
        bundle_id: bundle_id.to_string(),
        target: target.display().to_string(),
        mode: options.mode.to_string(),
        force: options.force,
        apply_exit: apply_result.exit_code,
        timed_out,
        verify: verify.clone(),
        logs: ApplyLogs {
            apply: apply_log.display().to_string(),
        },
        status,
    };
    let receipt_path = run.write_receipt(APPLY_RECEIPT_FILE, &receipt)?;
    info!(bundle_id, run_id = run.run_id(), %status, "apply recorded");

    Ok(ApplyOutcome {
        bundle_id: bundle_id.to_string(),
        run_id: run.run_id().to_string(),
        status,
        apply_exit: apply_result.exit_code,
        verify_exit: verify.exit,
        timed_out,
        receipt_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/bash\n{body}\n")).unwrap();
        path
    }

    #[test]
    fn test_run_logged_captures_combined_output() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "ok.sh", "echo out; echo err >&2; exit 0");
        let log = tmp.path().join("run.log");

        let result = run_logged(
            &script,
            &[],
            tmp.path(),
            &log,
            &[String::from("cmd=test")],
            None,
        )
        .unwrap();

        assert!(result.passed());
        assert_eq!(result.exit_code, Some(0));
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.starts_with("cmd=test\n"));
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[test]
    fn test_run_logged_records_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "fail.sh", "exit 3");
        let log = tmp.path().join("run.log");

        let result = run_logged(&script, &[], tmp.path(), &log, &[], None).unwrap();
        assert!(!result.passed());
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
    }

    #[test]
    fn test_run_logged_timeout_kills_child() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "hang.sh", "sleep 30");
        let log = tmp.path().join("run.log");

        let started = Instant::now();
        let result = run_logged(
            &script,
            &[],
            tmp.path(),
            &log,
            &[],
            Some(Duration::from_millis(200)),
        )
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(!result.passed());
        // Well under the child's sleep: the kill policy cut it short.
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[test]
    fn test_run_logged_passes_args() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "args.sh", r#"echo "got:$1 $2""#);
        let log = tmp.path().join("run.log");

        let args = vec!["--target".to_string(), "/tmp/t".to_string()];
        let result = run_logged(&script, &args, tmp.path(), &log, &[], None).unwrap();
        assert!(result.passed());
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("got:--target /tmp/t"));
    }

    #[test]
    fn test_apply_mode_labels() {
        assert_eq!(ApplyMode::Safe.to_string(), "SAFE");
        assert_eq!(ApplyMode::Guided.to_string(), "GUIDED");
        assert_eq!(ApplyMode::All.to_string(), "ALL");
        assert_eq!(ApplyMode::default(), ApplyMode::Guided);
    }
}
