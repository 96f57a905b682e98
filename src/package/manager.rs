//! Package lifecycle manager.
//!
//! Orchestrates install, upgrade, rollback, and uninstall of versioned,
//! namespace-owning packages. Each operation is an async sequence that
//! reads and later writes shared state, so operations on the same
//! package id are serialized behind a per-package lock; operations on
//! distinct packages proceed concurrently.
//!
//! Business-rule violations (already installed, conflicts, missing
//! dependencies, dependents exist) are structured [`PackageFailure`]
//! values, never panics — callers decide whether to retry with a
//! different version or namespace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::resolver::{resolve_order, GraphNode, ResolveError};

use super::manifest::PackageManifest;
use super::namespace::{NamespaceConflict, NamespaceResolver};

/// Lifecycle status of a package record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Present in the registry.
    Installed,
    /// Removed from the registry. Retained records never carry this
    /// status; it exists for hosts that persist historical state.
    Uninstalled,
}

/// Registry record for an installed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Package id.
    pub package_id: String,
    /// Installed version string.
    pub version: String,
    /// Record status.
    pub status: PackageStatus,
    /// The manifest the package was installed (or last upgraded) with.
    pub manifest: PackageManifest,
    /// Install time.
    pub installed_at: DateTime<Utc>,
}

/// Pre-upgrade state retained for exactly one rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSnapshot {
    /// Version before the upgrade.
    pub previous_version: String,
    /// Manifest before the upgrade.
    pub previous_manifest: PackageManifest,
    /// Namespaces owned before the upgrade.
    pub previous_namespaces: Vec<String>,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// The installed package.
    pub package_id: String,
    /// The installed version.
    pub version: String,
    /// Declared dependencies, all verified installed, sorted.
    pub installed_dependencies: Vec<String>,
}

/// Outcome of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeReport {
    /// The upgraded package.
    pub package_id: String,
    /// Version before the upgrade.
    pub previous_version: String,
    /// Version after the upgrade.
    pub version: String,
}

/// Outcome of a successful rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// The rolled-back package.
    pub package_id: String,
    /// The version restored from the snapshot.
    pub restored_version: String,
}

/// Outcome of a successful uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallReport {
    /// The removed package.
    pub package_id: String,
    /// Namespaces released, sorted.
    pub removed_namespaces: Vec<String>,
}

/// A package operation rejected by a business rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PackageFailure {
    /// Install of a package that is already present.
    #[error("package '{package_id}' is already installed")]
    AlreadyInstalled {
        /// The package id.
        package_id: String,
    },
    /// The manifest's platform range does not admit the host version.
    #[error("package '{package_id}' requires platform '{required}', host is {actual}")]
    PlatformIncompatible {
        /// The package id.
        package_id: String,
        /// The declared range, verbatim.
        required: String,
        /// The host platform version.
        actual: Version,
    },
    /// Declared dependency packages are not installed.
    #[error("package '{package_id}' is missing dependencies: {}", missing.join(", "))]
    MissingDependencies {
        /// The package id.
        package_id: String,
        /// The absent dependency ids, sorted.
        missing: Vec<String>,
    },
    /// Namespaces in the manifest are owned by other packages.
    #[error("package '{package_id}' has {} namespace conflict(s)", conflicts.len())]
    NamespaceConflicts {
        /// The package id.
        package_id: String,
        /// One entry per contested namespace.
        conflicts: Vec<NamespaceConflict>,
    },
    /// Operation on a package that is not installed.
    #[error("package '{package_id}' is not installed")]
    NotInstalled {
        /// The package id.
        package_id: String,
    },
    /// Uninstall blocked because other packages depend on this one.
    #[error("package '{package_id}' is required by: {}", dependents.join(", "))]
    DependentsExist {
        /// The package id.
        package_id: String,
        /// Installed packages declaring a dependency on it, sorted.
        dependents: Vec<String>,
    },
    /// Rollback with no retained upgrade snapshot.
    #[error("no upgrade snapshot for package '{package_id}'")]
    NoUpgradeSnapshot {
        /// The package id.
        package_id: String,
    },
}

/// Orchestrates package install/upgrade/rollback/uninstall against the
/// namespace registry.
pub struct PackageManager {
    platform_version: Version,
    namespaces: Arc<NamespaceResolver>,
    packages: RwLock<HashMap<String, InstalledPackage>>,
    snapshots: RwLock<HashMap<String, UpgradeSnapshot>>,
    /// One async mutex per package id; serializes the multi-step
    /// workflows for that package across their suspension points.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = match self.packages.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        };
        f.debug_struct("PackageManager")
            .field("platform", &self.platform_version)
            .field("installed", &count)
            .finish()
    }
}

impl PackageManager {
    /// Create a manager for a host at `platform_version`, sharing the
    /// given namespace registry.
    pub fn new(platform_version: Version, namespaces: Arc<NamespaceResolver>) -> Self {
        Self {
            platform_version,
            namespaces,
            packages: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The host platform version installs are validated against.
    pub fn platform_version(&self) -> &Version {
        &self.platform_version
    }

    /// The namespace registry this manager mutates.
    pub fn namespace_resolver(&self) -> Arc<NamespaceResolver> {
        Arc::clone(&self.namespaces)
    }

    // ── Operations ──

    /// Install `package_id` at `version` from `manifest`.
    ///
    /// Validation order, first failure wins: already installed, platform
    /// compatibility, dependency existence, namespace availability. On
    /// success the package's namespaces are registered and the record
    /// created.
    ///
    /// # Errors
    ///
    /// Returns the first applicable [`PackageFailure`]; nothing is
    /// mutated on failure.
    pub async fn install(
        &self,
        package_id: &str,
        version: &str,
        manifest: PackageManifest,
    ) -> Result<InstallReport, PackageFailure> {
        let lock = self.lock_for(package_id);
        let _serial = lock.lock().await;

        if self.is_installed(package_id) {
            return Err(PackageFailure::AlreadyInstalled {
                package_id: package_id.to_owned(),
            });
        }

        manifest.check_platform(&self.platform_version).map_err(|m| {
            PackageFailure::PlatformIncompatible {
                package_id: package_id.to_owned(),
                required: m.required,
                actual: m.actual,
            }
        })?;

        let mut dependencies: Vec<String> = manifest.dependencies.keys().cloned().collect();
        dependencies.sort();
        let missing: Vec<String> = dependencies
            .iter()
            .filter(|dep| !self.is_installed(dep))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PackageFailure::MissingDependencies {
                package_id: package_id.to_owned(),
                missing,
            });
        }

        let namespaces = NamespaceResolver::extract_namespaces(&manifest);
        let availability = self.namespaces.check_availability(package_id, &namespaces);
        if !availability.available {
            return Err(PackageFailure::NamespaceConflicts {
                package_id: package_id.to_owned(),
                conflicts: availability.conflicts,
            });
        }

        self.namespaces.register(package_id, &namespaces);
        {
            let mut packages = match self.packages.write() {
                Ok(packages) => packages,
                Err(poisoned) => poisoned.into_inner(),
            };
            packages.insert(
                package_id.to_owned(),
                InstalledPackage {
                    package_id: package_id.to_owned(),
                    version: version.to_owned(),
                    status: PackageStatus::Installed,
                    manifest,
                    installed_at: Utc::now(),
                },
            );
        }

        info!(package = package_id, version, "package installed");
        Ok(InstallReport {
            package_id: package_id.to_owned(),
            version: version.to_owned(),
            installed_dependencies: dependencies,
        })
    }

    /// Remove `package_id`, releasing its namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`PackageFailure::NotInstalled`] for an unknown package,
    /// or [`PackageFailure::DependentsExist`] while any other installed
    /// package declares a dependency on it.
    pub async fn uninstall(&self, package_id: &str) -> Result<UninstallReport, PackageFailure> {
        let lock = self.lock_for(package_id);
        let _serial = lock.lock().await;

        if !self.is_installed(package_id) {
            return Err(PackageFailure::NotInstalled {
                package_id: package_id.to_owned(),
            });
        }

        let dependents = self.dependents_of(package_id);
        if !dependents.is_empty() {
            return Err(PackageFailure::DependentsExist {
                package_id: package_id.to_owned(),
                dependents,
            });
        }

        let mut removed = self.namespaces.unregister(package_id);
        removed.sort();
        {
            let mut packages = match self.packages.write() {
                Ok(packages) => packages,
                Err(poisoned) => poisoned.into_inner(),
            };
            packages.remove(package_id);
        }
        {
            // A removed package has nothing left to roll back to.
            let mut snapshots = match self.snapshots.write() {
                Ok(snapshots) => snapshots,
                Err(poisoned) => poisoned.into_inner(),
            };
            snapshots.remove(package_id);
        }

        info!(package = package_id, "package uninstalled");
        Ok(UninstallReport {
            package_id: package_id.to_owned(),
            removed_namespaces: removed,
        })
    }

    /// Upgrade `package_id` in place to `new_version` / `new_manifest`.
    ///
    /// The namespace availability check covers only namespaces owned by
    /// *other* packages — a package never conflicts with itself. On
    /// success the pre-upgrade state is captured as the package's single
    /// retained [`UpgradeSnapshot`], replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns the first applicable [`PackageFailure`]; nothing is
    /// mutated on failure.
    pub async fn upgrade(
        &self,
        package_id: &str,
        new_version: &str,
        new_manifest: PackageManifest,
    ) -> Result<UpgradeReport, PackageFailure> {
        let lock = self.lock_for(package_id);
        let _serial = lock.lock().await;

        let current = self.get_package(package_id).ok_or_else(|| {
            PackageFailure::NotInstalled {
                package_id: package_id.to_owned(),
            }
        })?;

        new_manifest.check_platform(&self.platform_version).map_err(|m| {
            PackageFailure::PlatformIncompatible {
                package_id: package_id.to_owned(),
                required: m.required,
                actual: m.actual,
            }
        })?;

        let new_namespaces = NamespaceResolver::extract_namespaces(&new_manifest);
        let availability = self.namespaces.check_availability(package_id, &new_namespaces);
        if !availability.available {
            return Err(PackageFailure::NamespaceConflicts {
                package_id: package_id.to_owned(),
                conflicts: availability.conflicts,
            });
        }

        let snapshot = UpgradeSnapshot {
            previous_version: current.version.clone(),
            previous_manifest: current.manifest.clone(),
            previous_namespaces: self.namespaces.namespaces_of(package_id),
        };
        {
            let mut snapshots = match self.snapshots.write() {
                Ok(snapshots) => snapshots,
                Err(poisoned) => poisoned.into_inner(),
            };
            snapshots.insert(package_id.to_owned(), snapshot);
        }

        self.namespaces.unregister(package_id);
        self.namespaces.register(package_id, &new_namespaces);
        {
            let mut packages = match self.packages.write() {
                Ok(packages) => packages,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(record) = packages.get_mut(package_id) {
                record.version = new_version.to_owned();
                record.manifest = new_manifest;
            }
        }

        info!(
            package = package_id,
            from = current.version.as_str(),
            to = new_version,
            "package upgraded"
        );
        Ok(UpgradeReport {
            package_id: package_id.to_owned(),
            previous_version: current.version,
            version: new_version.to_owned(),
        })
    }

    /// Restore `package_id` to its pre-upgrade state and clear the
    /// snapshot. Each upgrade is revertible exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`PackageFailure::NotInstalled`] for an unknown package,
    /// or [`PackageFailure::NoUpgradeSnapshot`] when no snapshot is
    /// retained.
    pub async fn rollback(&self, package_id: &str) -> Result<RollbackReport, PackageFailure> {
        let lock = self.lock_for(package_id);
        let _serial = lock.lock().await;

        if !self.is_installed(package_id) {
            return Err(PackageFailure::NotInstalled {
                package_id: package_id.to_owned(),
            });
        }

        let snapshot = {
            let mut snapshots = match self.snapshots.write() {
                Ok(snapshots) => snapshots,
                Err(poisoned) => poisoned.into_inner(),
            };
            snapshots.remove(package_id)
        }
        .ok_or_else(|| PackageFailure::NoUpgradeSnapshot {
            package_id: package_id.to_owned(),
        })?;

        self.namespaces.unregister(package_id);
        self.namespaces.register(package_id, &snapshot.previous_namespaces);
        {
            let mut packages = match self.packages.write() {
                Ok(packages) => packages,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(record) = packages.get_mut(package_id) {
                record.version = snapshot.previous_version.clone();
                record.manifest = snapshot.previous_manifest;
            }
        }

        info!(
            package = package_id,
            version = snapshot.previous_version.as_str(),
            "package rolled back"
        );
        Ok(RollbackReport {
            package_id: package_id.to_owned(),
            restored_version: snapshot.previous_version,
        })
    }

    /// Compute an install order for a batch of packages with declared
    /// dependencies among themselves.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] on a cycle or a reference to a package
    /// absent from the batch.
    pub fn resolve_dependencies(&self, packages: &[GraphNode]) -> Result<Vec<String>, ResolveError> {
        resolve_order(packages)
    }

    // ── Introspection ──

    /// Whether `package_id` is currently installed.
    pub fn is_installed(&self, package_id: &str) -> bool {
        let packages = match self.packages.read() {
            Ok(packages) => packages,
            Err(poisoned) => poisoned.into_inner(),
        };
        packages.contains_key(package_id)
    }

    /// Clone of the record for `package_id`, if installed.
    pub fn get_package(&self, package_id: &str) -> Option<InstalledPackage> {
        let packages = match self.packages.read() {
            Ok(packages) => packages,
            Err(poisoned) => poisoned.into_inner(),
        };
        packages.get(package_id).cloned()
    }

    /// Clones of every installed package record, sorted by id.
    pub fn list_packages(&self) -> Vec<InstalledPackage> {
        let packages = match self.packages.read() {
            Ok(packages) => packages,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut list: Vec<InstalledPackage> = packages.values().cloned().collect();
        list.sort_by(|a, b| a.package_id.cmp(&b.package_id));
        list
    }

    /// Installed packages that declare a dependency on `package_id`,
    /// sorted.
    pub fn dependents_of(&self, package_id: &str) -> Vec<String> {
        let packages = match self.packages.read() {
            Ok(packages) => packages,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut dependents: Vec<String> = packages
            .values()
            .filter(|p| p.package_id != package_id)
            .filter(|p| p.manifest.dependencies.contains_key(package_id))
            .map(|p| p.package_id.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Whether an upgrade snapshot is retained for `package_id`.
    pub fn has_snapshot(&self, package_id: &str) -> bool {
        let snapshots = match self.snapshots.read() {
            Ok(snapshots) => snapshots,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots.contains_key(package_id)
    }

    // ── Internals ──

    fn lock_for(&self, package_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(package_id.to_owned()).or_default())
    }
}
