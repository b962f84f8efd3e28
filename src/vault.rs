//! Content Vault Store
//!
//! The vault is the single durable root for everything the engine writes:
//!
//! ```text
//! <vault>/memory/bundles/<YYYY>/<MM>/<bundle_id>/
//!     bundle.tar.gz
//!     manifest.json            (canonical copy)
//!     import_meta.json
//! <vault>/runs/<run_id>/
//!     <operation>_receipt.json
//!     logs/
//! <vault>/index/
//! ```
//!
//! The root is resolved exactly once at the CLI boundary, from (in priority
//! order) an explicit override, the `BUNDLEVAULT_HOME` environment variable,
//! or `~/.bundlevault`. The environment is never re-read mid-operation.
//!
//! Bundle storage is partitioned by time of import. Writes of the three
//! store artifacts are not atomic as a group; an interruption mid-import can
//! leave a partially populated bundle directory. This is a documented risk,
//! not a guarded condition.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::STORED_ARCHIVE_NAME;
use crate::error::{EngineError, Result};
use crate::manifest::MANIFEST_FILE;

/// Environment variable selecting the vault root when no override is given.
pub const VAULT_ENV_VAR: &str = "BUNDLEVAULT_HOME";

/// Default vault directory name under the user's home.
pub const DEFAULT_VAULT_DIR: &str = ".bundlevault";

/// File name of the import metadata document inside a store directory.
pub const IMPORT_META_FILE: &str = "import_meta.json";

/// What to do when a bundle id already occupies its current time partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConflictPolicy {
    /// Reuse the partition directory; artifacts are rewritten in place.
    #[default]
    Overwrite,
    /// Allocate a fresh `-rN` suffixed directory, keeping prior imports.
    Version,
}

/// Import metadata written alongside each stored bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportMeta {
    pub schema_version: i64,
    pub bundle_id: String,
    pub imported_at: DateTime<Utc>,
    pub source_archive_path: String,
    pub archive_bytes: u64,
    pub archive_sha256: String,
    pub manifest_sha256: String,
    pub tags: Vec<String>,
    pub vault_store_dir: String,
}

/// Handle to a resolved vault root.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

/// Resolve the vault root from an override, an env value, and a home dir.
///
/// Pure so the priority order stays testable without touching the process
/// environment.
fn resolve_root(
    override_path: Option<&Path>,
    env_value: Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(p) = override_path {
        return Ok(p.to_path_buf());
    }
    if let Some(env) = env_value {
        let trimmed = env.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    home.map(|h| h.join(DEFAULT_VAULT_DIR))
        .ok_or_else(|| EngineError::vault("cannot determine home directory for default vault root"))
}

impl Vault {
    /// Resolve the vault root: override > `BUNDLEVAULT_HOME` > `~/.bundlevault`.
    ///
    /// Call once at the operation boundary and thread the handle through.
    pub fn resolve(override_path: Option<&Path>) -> Result<Self> {
        let root = resolve_root(
            override_path,
            std::env::var(VAULT_ENV_VAR).ok(),
            dirs::home_dir(),
        )?;
        Ok(Self { root })
    }

    /// Open a vault at an explicit root, bypassing resolution.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `memory/bundles` — bundle storage area.
    pub fn bundles_dir(&self) -> PathBuf {
        self.root.join("memory").join("bundles")
    }

    /// `runs` — run ledger area.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// `index` — reserved for a future id-to-path index.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Create the three top-level areas. Idempotent.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.bundles_dir(), self.runs_dir(), self.index_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Storage directory for a bundle under the current time partition.
    ///
    /// Partitioned by time of import, not time of bundle creation. Under the
    /// `Version` policy an occupied directory gets a `-r2`, `-r3`, ... sibling
    /// instead of being reused.
    pub fn store_dir_for(
        &self,
        bundle_id: &str,
        imported_at: DateTime<Utc>,
        policy: ConflictPolicy,
    ) -> PathBuf {
        let partition = self
            .bundles_dir()
            .join(format!("{:04}", imported_at.year()))
            .join(format!("{:02}", imported_at.month()));
        let base = partition.join(bundle_id);
        match policy {
            ConflictPolicy::Overwrite => base,
            ConflictPolicy::Version => {
                if !base.exists() {
                    return base;
                }
                let mut revision = 2u32;
                loop {
                    let candidate = partition.join(format!("{bundle_id}-r{revision}"));
                    if !candidate.exists() {
                        return candidate;
                    }
                    revision += 1;
                }
            }
        }
    }

    /// Write the three store artifacts for an imported bundle: the raw
    /// archive bytes, the canonical manifest, and the import metadata.
    pub fn write_bundle_artifacts(
        &self,
        store_dir: &Path,
        archive_bytes: &[u8],
        canonical_manifest: &str,
        meta: &ImportMeta,
    ) -> Result<()> {
        fs::create_dir_all(store_dir)?;
        fs::write(store_dir.join(STORED_ARCHIVE_NAME), archive_bytes)?;
        fs::write(store_dir.join(MANIFEST_FILE), canonical_manifest)?;
        let mut meta_json = serde_json::to_string_pretty(&serde_json::to_value(meta)?)?;
        meta_json.push('\n');
        fs::write(store_dir.join(IMPORT_META_FILE), meta_json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_resolve_root_priority_order() {
        let override_path = Path::new("/explicit/vault");
        let env = Some("/env/vault".to_string());
        let home = Some(PathBuf::from("/home/user"));

        let root = resolve_root(Some(override_path), env.clone(), home.clone()).unwrap();
        assert_eq!(root, PathBuf::from("/explicit/vault"));

        let root = resolve_root(None, env, home.clone()).unwrap();
        assert_eq!(root, PathBuf::from("/env/vault"));

        let root = resolve_root(None, None, home).unwrap();
        assert_eq!(root, PathBuf::from("/home/user/.bundlevault"));
    }

    #[test]
    fn test_resolve_root_blank_env_falls_through() {
        let root = resolve_root(
            None,
            Some("   ".to_string()),
            Some(PathBuf::from("/home/user")),
        )
        .unwrap();
        assert_eq!(root, PathBuf::from("/home/user/.bundlevault"));
    }

    #[test]
    fn test_resolve_root_no_home_is_error() {
        let err = resolve_root(None, None, None).unwrap_err();
        assert!(matches!(err, EngineError::Vault(_)));
    }

    #[test]
    fn test_ensure_layout_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::at(dir.path());
        vault.ensure_layout().unwrap();
        vault.ensure_layout().unwrap();
        assert!(vault.bundles_dir().is_dir());
        assert!(vault.runs_dir().is_dir());
        assert!(vault.index_dir().is_dir());
    }

    #[test]
    fn test_store_dir_time_partitioning() {
        let vault = Vault::at("/v");
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let dir = vault.store_dir_for("demo-1", at, ConflictPolicy::Overwrite);
        assert_eq!(
            dir,
            PathBuf::from("/v/memory/bundles/2026/03/demo-1")
        );
    }

    #[test]
    fn test_version_policy_allocates_revisions() {
        let tmp = tempfile::tempdir().unwrap();
        let vault = Vault::at(tmp.path());
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();

        let first = vault.store_dir_for("demo-1", at, ConflictPolicy::Version);
        assert!(first.ends_with("demo-1"));
        fs::create_dir_all(&first).unwrap();

        let second = vault.store_dir_for("demo-1", at, ConflictPolicy::Version);
        assert!(second.ends_with("demo-1-r2"));
        fs::create_dir_all(&second).unwrap();

        let third = vault.store_dir_for("demo-1", at, ConflictPolicy::Version);
        assert!(third.ends_with("demo-1-r3"));
    }

    #[test]
    fn test_overwrite_policy_reuses_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let vault = Vault::at(tmp.path());
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();

        let first = vault.store_dir_for("demo-1", at, ConflictPolicy::Overwrite);
        fs::create_dir_all(&first).unwrap();
        let second = vault.store_dir_for("demo-1", at, ConflictPolicy::Overwrite);
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_bundle_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let vault = Vault::at(tmp.path());
        let store_dir = tmp.path().join("store");
        let meta = ImportMeta {
            schema_version: 1,
            bundle_id: "demo-1".to_string(),
            imported_at: Utc::now(),
            source_archive_path: "/src/bundle.tar.gz".to_string(),
            archive_bytes: 3,
            archive_sha256: "abc".to_string(),
            manifest_sha256: "def".to_string(),
            tags: vec!["t1".to_string()],
            vault_store_dir: store_dir.display().to_string(),
        };
        vault
            .write_bundle_artifacts(&store_dir, b"raw", "{}\n", &meta)
            .unwrap();

        assert_eq!(fs::read(store_dir.join(STORED_ARCHIVE_NAME)).unwrap(), b"raw");
        assert_eq!(fs::read_to_string(store_dir.join(MANIFEST_FILE)).unwrap(), "{}\n");
        let meta_text = fs::read_to_string(store_dir.join(IMPORT_META_FILE)).unwrap();
        let reparsed: ImportMeta = serde_json::from_str(&meta_text).unwrap();
        assert_eq!(reparsed, meta);
        assert!(meta_text.ends_with('\n'));
    }
}
