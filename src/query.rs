//! Query Layer
//!
//! Lookup and enumeration over the bundle storage area. Both operations are
//! linear scans over stored manifests, which is fine at the expected scale of
//! a personal vault; an explicit id-to-path index under `<vault>/index/` is
//! the upgrade path if that stops being true.

use std::path::PathBuf;
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::manifest::{BundleManifest, MANIFEST_FILE};
use crate::vault::Vault;

/// Maximum number of entries `list` returns.
pub const LIST_LIMIT: usize = 200;

/// One row of `bundle list` output.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub bundle_id: String,
    pub store_dir: PathBuf,
    pub manifest_mtime: SystemTime,
}

/// All directories under `memory/bundles` containing a stored manifest.
fn bundle_dirs(vault: &Vault) -> Vec<PathBuf> {
    let base = vault.bundles_dir();
    if !base.is_dir() {
        return Vec::new();
    }
    WalkDir::new(&base)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| dir.join(MANIFEST_FILE).is_file())
        .collect()
}

/// Enumerate stored bundles, most recently written manifest first, capped at
/// [`LIST_LIMIT`] entries.
pub fn list_bundles(vault: &Vault) -> Result<Vec<BundleEntry>> {
    let mut entries = Vec::new();
    for dir in bundle_dirs(vault) {
        let manifest_path = dir.join(MANIFEST_FILE);
        let mtime = std::fs::metadata(&manifest_path)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let manifest = BundleManifest::from_slice(&std::fs::read(&manifest_path)?)?;
        entries.push(BundleEntry {
            bundle_id: manifest.bundle_id,
            store_dir: dir,
            manifest_mtime: mtime,
        });
    }
    entries.sort_by(|a, b| {
        b.manifest_mtime
            .cmp(&a.manifest_mtime)
            .then_with(|| b.store_dir.cmp(&a.store_dir))
    });
    entries.truncate(LIST_LIMIT);
    Ok(entries)
}

/// Resolve a bundle id to its storage directory by linear scan.
pub fn find_bundle_dir(vault: &Vault, bundle_id: &str) -> Result<PathBuf> {
    for dir in bundle_dirs(vault) {
        let manifest = BundleManifest::from_slice(&std::fs::read(dir.join(MANIFEST_FILE))?)?;
        if manifest.bundle_id == bundle_id {
            return Ok(dir);
        }
    }
    Err(EngineError::not_found(format!(
        "bundle not in vault: {bundle_id}"
    )))
}

/// Return the stored canonical manifest content verbatim.
pub fn show_manifest(vault: &Vault, bundle_id: &str) -> Result<String> {
    let dir = find_bundle_dir(vault, bundle_id)?;
    Ok(std::fs::read_to_string(dir.join(MANIFEST_FILE))?)
}
