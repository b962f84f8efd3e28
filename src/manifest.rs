//! Bundle Manifest Contracts
//!
//! This module defines the contract between the engine and bundle archives:
//! every bundle carries a `manifest.json` at its archive root, and the engine
//! refuses to store or execute anything whose manifest fails validation.
//!
//! # Design Principles
//!
//! 1. **Explicit Contracts**: Every bundle must declare its entrypoint
//! 2. **Fail Fast**: Validation runs before any vault write occurs
//! 3. **No Defaulting**: The document must already be well-formed; nothing is
//!    normalized or filled in on the bundle's behalf
//!
//! # Manifest Format
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "bundle_id": "demo-1",
//!   "apply": {
//!     "default_entrypoint": "run.sh",
//!     "verification": { "path": "checks/verify.sh" }
//!   },
//!   "targets": ["project-a"]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Name of the manifest file, both at the archive root and as the canonical
/// stored copy inside the vault.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest schema version this engine understands.
pub const MANIFEST_SCHEMA_VERSION: i64 = 1;

/// The `apply.verification` block: an optional post-entrypoint check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VerificationSpec {
    /// Path to the verification script (relative or absolute). The script is
    /// run with its working directory set to the apply target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The `apply` block: what executing this bundle means.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplySpec {
    /// Path to the entrypoint script, relative to the extracted archive root.
    #[serde(default)]
    pub default_entrypoint: String,

    /// Optional verification step gating overall apply success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSpec>,
}

/// Versioned bundle declaration document.
///
/// Fields default leniently at parse time so that validation, not
/// deserialization, reports the precise missing field. Unknown fields are
/// rejected outright to avoid silent misreads of misspelled keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BundleManifest {
    /// Must equal [`MANIFEST_SCHEMA_VERSION`].
    #[serde(default)]
    pub schema_version: i64,

    /// Non-empty, immutable identity of the bundle.
    #[serde(default)]
    pub bundle_id: String,

    /// Execution declaration. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplySpec>,

    /// Project identifiers, recorded as receipt metadata only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl BundleManifest {
    /// Parse a manifest from raw JSON bytes.
    ///
    /// A document that is not JSON, or that carries unknown or wrongly-typed
    /// fields, is a validation failure, not an IO failure.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::validation(format!("failed to parse {MANIFEST_FILE}: {e}")))
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// Validate the minimal structural contract, in declaration order.
    ///
    /// Checks: `schema_version == 1`, `bundle_id` non-empty, `apply` present,
    /// `apply.default_entrypoint` non-empty. The first failure aborts with a
    /// human-readable reason and no side effects.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(EngineError::validation(format!(
                "manifest schema_version must be {MANIFEST_SCHEMA_VERSION} (got {})",
                self.schema_version
            )));
        }
        if self.bundle_id.is_empty() {
            return Err(EngineError::validation("manifest bundle_id missing/invalid"));
        }
        let apply = self
            .apply
            .as_ref()
            .ok_or_else(|| EngineError::validation("manifest apply missing/invalid"))?;
        if apply.default_entrypoint.is_empty() {
            return Err(EngineError::validation(
                "manifest apply.default_entrypoint missing",
            ));
        }
        Ok(())
    }

    /// Entrypoint path, relative to the extracted archive root.
    ///
    /// Only meaningful after [`validate`](Self::validate) has passed.
    pub fn entrypoint(&self) -> &str {
        self.apply
            .as_ref()
            .map(|a| a.default_entrypoint.as_str())
            .unwrap_or("")
    }

    /// Declared verification script path, if any. Empty strings count as
    /// undeclared.
    pub fn verification_path(&self) -> Option<&str> {
        self.apply
            .as_ref()
            .and_then(|a| a.verification.as_ref())
            .and_then(|v| v.path.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Canonical serialization: pretty-printed JSON with key-sorted objects
    /// and a trailing newline. This is the form stored in the vault.
    pub fn to_canonical_json(&self) -> Result<String> {
        // Round-trip through Value so map keys come out sorted regardless of
        // struct field order.
        let value = serde_json::to_value(self)?;
        let mut out = serde_json::to_string_pretty(&value)?;
        out.push('\n');
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{"schema_version":1,"bundle_id":"demo-1","apply":{"default_entrypoint":"run.sh"}}"#
    }

    #[test]
    fn test_minimal_manifest_validates() {
        let manifest = BundleManifest::from_json(minimal_json()).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.bundle_id, "demo-1");
        assert_eq!(manifest.entrypoint(), "run.sh");
        assert!(manifest.verification_path().is_none());
        assert!(manifest.targets.is_empty());
    }

    #[test]
    fn test_wrong_schema_version_rejected() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":2,"bundle_id":"x","apply":{"default_entrypoint":"run.sh"}}"#,
        )
        .unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("schema_version"));
    }

    #[test]
    fn test_missing_bundle_id_rejected() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":1,"apply":{"default_entrypoint":"run.sh"}}"#,
        )
        .unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("bundle_id"));
    }

    #[test]
    fn test_missing_apply_rejected() {
        let manifest =
            BundleManifest::from_json(r#"{"schema_version":1,"bundle_id":"demo-1"}"#).unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("apply"));
    }

    #[test]
    fn test_missing_entrypoint_rejected() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":1,"bundle_id":"demo-1","apply":{}}"#,
        )
        .unwrap();
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("default_entrypoint"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = BundleManifest::from_json(
            r#"{"schema_version":1,"bundle_id":"x","apply":{"default_entrypoint":"run.sh"},"extra":true}"#,
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_non_json_is_validation_error() {
        let result = BundleManifest::from_slice(b"not json at all");
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_verification_path_empty_string_is_undeclared() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":1,"bundle_id":"x","apply":{"default_entrypoint":"run.sh","verification":{"path":""}}}"#,
        )
        .unwrap();
        assert!(manifest.verification_path().is_none());
    }

    #[test]
    fn test_verification_path_declared() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":1,"bundle_id":"x","apply":{"default_entrypoint":"run.sh","verification":{"path":"verify.sh"}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.verification_path(), Some("verify.sh"));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let manifest = BundleManifest::from_json(
            r#"{"targets":["p1"],"schema_version":1,"bundle_id":"demo-1","apply":{"default_entrypoint":"run.sh"}}"#,
        )
        .unwrap();
        let canonical = manifest.to_canonical_json().unwrap();
        let apply_pos = canonical.find("\"apply\"").unwrap();
        let bundle_pos = canonical.find("\"bundle_id\"").unwrap();
        let schema_pos = canonical.find("\"schema_version\"").unwrap();
        let targets_pos = canonical.find("\"targets\"").unwrap();
        assert!(apply_pos < bundle_pos && bundle_pos < schema_pos && schema_pos < targets_pos);
        assert!(canonical.ends_with('\n'));
    }

    #[test]
    fn test_canonical_roundtrip_preserves_content() {
        let manifest = BundleManifest::from_json(
            r#"{"schema_version":1,"bundle_id":"demo-1","apply":{"default_entrypoint":"run.sh"},"targets":["a","b"]}"#,
        )
        .unwrap();
        let canonical = manifest.to_canonical_json().unwrap();
        let reparsed = BundleManifest::from_json(&canonical).unwrap();
        assert_eq!(manifest, reparsed);
    }
}
