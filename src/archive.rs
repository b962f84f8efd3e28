//! Bundle archive reading
//!
//! Bundles are gzip-compressed tar archives. The only fixed layout
//! requirement is a `manifest.json` at the archive root; everything else in
//! the archive is opaque to the engine until apply-time extraction.
//!
//! Standard tools (`tar -tzf`, `jq`) can inspect bundle contents.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;

use crate::error::{EngineError, Result};
use crate::manifest::MANIFEST_FILE;

/// Extension used for stored bundle archives.
pub const BUNDLE_ARCHIVE_EXT: &str = "tar.gz";

/// File name of the raw archive copy inside a bundle's store directory.
pub const STORED_ARCHIVE_NAME: &str = "bundle.tar.gz";

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn open_archive(path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(path)
        .map_err(|e| EngineError::archive(path, format!("cannot open archive: {e}")))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

/// True when a tar entry path names a file directly at the archive root.
/// Tolerates a leading `./` component, which common tar writers emit.
fn is_root_entry(entry_path: &Path, name: &str) -> bool {
    let mut components = entry_path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));
    match (components.next(), components.next()) {
        (Some(Component::Normal(first)), None) => first == name,
        _ => false,
    }
}

/// Read the raw bytes of the root `manifest.json` from a bundle archive.
///
/// Fails with a validation error when the archive carries no root manifest;
/// nothing is extracted to disk.
pub fn read_root_manifest(path: &Path) -> Result<Vec<u8>> {
    let mut archive = open_archive(path)?;
    let entries = archive
        .entries()
        .map_err(|e| EngineError::archive(path, format!("cannot read archive: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| EngineError::archive(path, format!("corrupt archive entry: {e}")))?;
        let entry_path: PathBuf = entry
            .path()
            .map_err(|e| EngineError::archive(path, format!("bad entry path: {e}")))?
            .into_owned();
        if is_root_entry(&entry_path, MANIFEST_FILE) {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| EngineError::archive(path, format!("cannot read {MANIFEST_FILE}: {e}")))?;
            return Ok(bytes);
        }
    }

    Err(EngineError::validation(format!(
        "archive must contain {MANIFEST_FILE} at root: {}",
        path.display()
    )))
}

/// Extract the full archive into `dest`.
pub fn extract_to(path: &Path, dest: &Path) -> Result<()> {
    let mut archive = open_archive(path)?;
    archive
        .unpack(dest)
        .map_err(|e| EngineError::archive(path, format!("extraction failed: {e}")))?;
    Ok(())
}
