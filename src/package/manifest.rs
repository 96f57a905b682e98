//! Package manifest model.
//!
//! A manifest is JSON: identity fields, an `engine` block declaring the
//! platform version range the package supports, a `dependencies` map of
//! package id to version range, and any number of metadata category
//! blocks (`objects`, `views`, ...) that the namespace resolver scans.
//! Unknown top-level fields are preserved in `metadata` rather than
//! rejected, since the schema layer — not the kernel — owns their shape.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform version requirements declared by a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineRequirements {
    /// Version range the host platform must satisfy, e.g. `"^3.0.0"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectstack: Option<String>,
}

/// The manifest declares a platform range the host does not satisfy
/// (or a range that does not parse).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("requires platform '{required}', host is {actual}")]
pub struct PlatformMismatch {
    /// The declared range, verbatim.
    pub required: String,
    /// The host platform version.
    pub actual: Version,
}

/// A package manifest as shipped in `package.json`-style metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package id, when the manifest carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Package version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Platform requirements.
    #[serde(default)]
    pub engine: EngineRequirements,
    /// Package id → version range. Only existence of the dependency is
    /// checked at install time; range semantics belong to the registry.
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    /// Everything else, including the metadata category blocks the
    /// namespace resolver scans.
    #[serde(flatten)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PackageManifest {
    /// Parse a manifest from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error annotated with context.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse package manifest")
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))
    }

    /// Check the declared `engine.objectstack` range against the host
    /// platform version. A manifest with no declaration is compatible.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformMismatch`] when the host falls outside the range,
    /// and also when the declared range fails to parse — an unreadable
    /// requirement is treated as unsatisfiable rather than ignored.
    pub fn check_platform(&self, platform: &Version) -> Result<(), PlatformMismatch> {
        let Some(required) = self.engine.objectstack.as_deref() else {
            return Ok(());
        };

        let mismatch = || PlatformMismatch {
            required: required.to_owned(),
            actual: platform.clone(),
        };

        let req = VersionReq::parse(required).map_err(|_| mismatch())?;
        if req.matches(platform) {
            Ok(())
        } else {
            Err(mismatch())
        }
    }
}
