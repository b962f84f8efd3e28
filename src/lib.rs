//! bundlevault Library
//!
//! Content-tracked bundle import/apply engine: bundles are self-describing
//! tar.gz archives, durably stored in a local vault and later executed
//! against target directories with an append-only receipt trail.

pub mod apply;
pub mod archive;
pub mod cli;
pub mod error;
pub mod import;
pub mod ledger;
pub mod manifest;
pub mod query;
pub mod vault;

// Re-export main types for convenience
pub use apply::{apply_bundle, plan_bundle, ApplyMode, ApplyOptions, ApplyOutcome, PlanSummary};
pub use error::{EngineError, Result};
pub use import::{import_bundle, ImportOptions, ImportOutcome};
pub use ledger::{ApplyReceipt, ImportReceipt, RunDir, RunStatus};
pub use manifest::{BundleManifest, MANIFEST_FILE};
pub use query::{find_bundle_dir, list_bundles, show_manifest, BundleEntry, LIST_LIMIT};
pub use vault::{ConflictPolicy, ImportMeta, Vault, VAULT_ENV_VAR};
