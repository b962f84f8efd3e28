//! Import Pipeline
//!
//! Orchestrates validation, storage, and receipt-writing for a new bundle:
//! read the archive, hash it, require and validate the root manifest, persist
//! the three store artifacts, then record an import receipt.
//!
//! Ordering matters: every check runs before the first vault write, so a
//! rejected bundle leaves no trace. An import receipt is only ever written
//! for a fully persisted bundle, which is why its status is always `pass`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::archive::{read_root_manifest, sha256_hex};
use crate::error::{EngineError, Result};
use crate::ledger::{
    ImportReceipt, LinksCreated, ObjectRef, RunDir, RunStatus, SourceRef, new_run_id,
    IMPORT_RECEIPT_FILE,
};
use crate::manifest::BundleManifest;
use crate::vault::{ConflictPolicy, ImportMeta, Vault};

/// Caller-supplied import options.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Free-form tags recorded in the import metadata and receipt.
    pub tags: Vec<String>,
    /// Behavior when the bundle id already occupies the current partition.
    pub on_conflict: ConflictPolicy,
}

/// What a successful import produced.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub bundle_id: String,
    pub store_dir: PathBuf,
    pub run_id: String,
    pub receipt_path: PathBuf,
}

/// Import an archive into the vault.
///
/// Side effects are confined to the vault; the source archive is never
/// mutated. Any failure before persistence aborts with no receipt written.
pub fn import_bundle(
    vault: &Vault,
    archive_path: &Path,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    if !archive_path.is_file() {
        return Err(EngineError::not_found(format!(
            "archive not found: {}",
            archive_path.display()
        )));
    }

    let archive_bytes = std::fs::read(archive_path)?;
    let archive_sha256 = sha256_hex(&archive_bytes);
    debug!(
        archive = %archive_path.display(),
        bytes = archive_bytes.len(),
        sha256 = %archive_sha256,
        "read source archive"
    );

    let manifest = BundleManifest::from_slice(&read_root_manifest(archive_path)?)?;
    manifest.validate()?;
    let bundle_id = manifest.bundle_id.clone();

    vault.ensure_layout()?;
    let imported_at = Utc::now();
    let store_dir = vault.store_dir_for(&bundle_id, imported_at, options.on_conflict);

    let canonical_manifest = manifest.to_canonical_json()?;
    let meta = ImportMeta {
        schema_version: 1,
        bundle_id: bundle_id.clone(),
        imported_at,
        source_archive_path: archive_path.display().to_string(),
        archive_bytes: archive_bytes.len() as u64,
        archive_sha256,
        manifest_sha256: sha256_hex(canonical_manifest.as_bytes()),
        tags: options.tags.clone(),
        vault_store_dir: store_dir.display().to_string(),
    };
    vault.write_bundle_artifacts(&store_dir, &archive_bytes, &canonical_manifest, &meta)?;

    let run = RunDir::create(vault, new_run_id(imported_at))?;
    let receipt = ImportReceipt {
        schema_version: 1,
        import_id: format!("import_{}", run.run_id()),
        imported_at,
        source: SourceRef {
            kind: "path".to_string(),
            reference: archive_path.display().to_string(),
        },
        objects: vec![ObjectRef {
            kind: "bundle".to_string(),
            id: bundle_id.clone(),
        }],
        status: RunStatus::Pass,
        reasons: Vec::new(),
        links_created: LinksCreated {
            project_ids: manifest.targets.clone(),
            tags: options.tags.clone(),
        },
        bundle: meta,
    };
    let receipt_path = run.write_receipt(IMPORT_RECEIPT_FILE, &receipt)?;

    info!(
        bundle_id = %bundle_id,
        store_dir = %store_dir.display(),
        run_id = run.run_id(),
        "bundle imported"
    );

    Ok(ImportOutcome {
        bundle_id,
        store_dir,
        run_id: run.run_id().to_string(),
        receipt_path,
    })
}
