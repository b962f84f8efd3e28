//! Run Ledger
//!
//! Every mutating operation (import or apply) allocates exactly one run and
//! writes exactly one receipt under `<vault>/runs/<run_id>/`, plus any log
//! files under `logs/`. Receipts are write-once: the ledger is append-only
//! across the vault's lifetime, with no edit, delete, or compaction path.
//!
//! Run ids are a UTC timestamp plus a short random suffix, unique enough for
//! filesystem use without any coordination.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::vault::{ImportMeta, Vault};

/// Receipt file name for imports.
pub const IMPORT_RECEIPT_FILE: &str = "import_receipt.json";

/// Receipt file name for applies.
pub const APPLY_RECEIPT_FILE: &str = "apply_receipt.json";

/// Final status of a recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

/// Where an imported archive came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// An object touched by an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: String,
    pub id: String,
}

/// Links recorded at import time: manifest targets and user-supplied tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinksCreated {
    pub project_ids: Vec<String>,
    pub tags: Vec<String>,
}

/// Immutable record of one import run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReceipt {
    pub schema_version: i64,
    pub import_id: String,
    pub imported_at: DateTime<Utc>,
    pub source: SourceRef,
    pub objects: Vec<ObjectRef>,
    pub status: RunStatus,
    pub reasons: Vec<String>,
    pub links_created: LinksCreated,
    pub bundle: ImportMeta,
}

/// Verification outcome embedded in an apply receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRecord {
    pub path: Option<String>,
    pub exit: Option<i32>,
    pub log: Option<String>,
}

/// Log references embedded in an apply receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyLogs {
    pub apply: String,
}

/// Immutable record of one apply run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyReceipt {
    pub schema_version: i64,
    pub apply_id: String,
    pub applied_at: DateTime<Utc>,
    pub bundle_id: String,
    pub target: String,
    pub mode: String,
    pub force: bool,
    pub apply_exit: Option<i32>,
    pub timed_out: bool,
    pub verify: VerifyRecord,
    pub logs: ApplyLogs,
    pub status: RunStatus,
}

/// Allocate a run identifier: `YYYYMMDDTHHMMSSZ_xxxxxx`.
pub fn new_run_id(at: DateTime<Utc>) -> String {
    let mut suffix = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!(
        "{}_{:02x}{:02x}{:02x}",
        at.format("%Y%m%dT%H%M%SZ"),
        suffix[0],
        suffix[1],
        suffix[2]
    )
}

/// A freshly created run directory, ready to receive logs and one receipt.
#[derive(Debug)]
pub struct RunDir {
    run_id: String,
    dir: PathBuf,
}

impl RunDir {
    /// Create `<vault>/runs/<run_id>/` for a new run.
    pub fn create(vault: &Vault, run_id: String) -> Result<Self> {
        let dir = vault.runs_dir().join(&run_id);
        fs::create_dir_all(&dir)?;
        Ok(Self { run_id, dir })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create (idempotently) and return the `logs/` subdirectory.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        let logs = self.dir.join("logs");
        fs::create_dir_all(&logs)?;
        Ok(logs)
    }

    /// Write the run's receipt. Write-once: a second call for the same file
    /// is a vault error, never an overwrite.
    pub fn write_receipt<T: Serialize>(&self, file_name: &str, receipt: &T) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        if path.exists() {
            return Err(EngineError::vault(format!(
                "receipt already written: {}",
                path.display()
            )));
        }
        // Key-sorted, pretty-printed, trailing newline: receipts should diff
        // cleanly and be greppable with standard tools.
        let value = serde_json::to_value(receipt)?;
        let mut file = fs::File::create(&path)?;
        let text = serde_json::to_string_pretty(&value)?;
        file.write_all(text.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(path)
    }
}
