//! Package lifecycle — manifest model, namespace ownership, and the
//! install/upgrade/rollback/uninstall workflow.

pub mod manifest;
pub mod manager;
pub mod namespace;

pub use manifest::{PackageManifest, PlatformMismatch};
pub use manager::{
    InstallReport, InstalledPackage, PackageFailure, PackageManager, PackageStatus,
    RollbackReport, UninstallReport, UpgradeReport, UpgradeSnapshot,
};
pub use namespace::{
    AvailabilityReport, NamespaceConflict, NamespaceEntry, NamespaceResolver, METADATA_CATEGORIES,
};
