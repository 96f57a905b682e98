//! Configuration loading and validation.
//!
//! One TOML file (`kernel.toml` by default) covers the host platform
//! identity, startup orchestration, and logging. Every field has a
//! default so an empty file — or no file at all — yields a working
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use semver::Version;
use serde::Deserialize;

use crate::kernel::KernelOptions;
use crate::types::GrantPolicy;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "kernel.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KernelConfig {
    /// Host platform identity.
    #[serde(default)]
    pub platform: PlatformSection,

    /// Startup orchestration.
    #[serde(default)]
    pub kernel: KernelSection,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Host platform identity checked against package `engine` ranges.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    /// Platform semver, e.g. `"3.1.0"`.
    #[serde(default = "default_platform_version")]
    pub version: String,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            version: default_platform_version(),
        }
    }
}

/// Startup orchestration options.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelSection {
    /// Log filter applied when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Start mutually-independent plugins concurrently.
    #[serde(default)]
    pub parallel_startup: bool,

    /// Per-plugin limit in seconds on `init` and `start`.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,

    /// Destroy already-started plugins when bootstrap fails.
    #[serde(default)]
    pub rollback_on_failure: bool,

    /// Capability grant policy applied at bootstrap.
    #[serde(default)]
    pub grant_policy: GrantPolicy,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            parallel_startup: false,
            startup_timeout_secs: None,
            rollback_on_failure: false,
            grant_policy: GrantPolicy::default(),
        }
    }
}

/// Log output locations.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Directory for rotated JSON log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
        }
    }
}

fn default_platform_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./logs")
}

impl KernelConfig {
    /// Load configuration.
    ///
    /// Precedence: an explicit `path` must exist and parse; otherwise
    /// `./kernel.toml` is used if present; otherwise defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let raw = std::fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read config {}", candidate.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", candidate.display()))
    }

    /// The host platform version as a parsed semver.
    ///
    /// # Errors
    ///
    /// Returns an error if `platform.version` is not valid semver.
    pub fn platform_version(&self) -> anyhow::Result<Version> {
        Version::parse(&self.platform.version).with_context(|| {
            format!("invalid platform.version '{}'", self.platform.version)
        })
    }

    /// Startup options for [`crate::kernel::Kernel`] construction.
    pub fn kernel_options(&self) -> KernelOptions {
        KernelOptions {
            parallel: self.kernel.parallel_startup,
            startup_timeout: self.kernel.startup_timeout_secs.map(Duration::from_secs),
            rollback_on_failure: self.kernel.rollback_on_failure,
            grant_policy: self.kernel.grant_policy,
        }
    }
}
