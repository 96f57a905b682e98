//! Namespace ownership registry.
//!
//! Every metadata item a package declares claims a `"<category>.<name>"`
//! namespace, and exactly one package owns a namespace at a time.
//! Conflict *prevention* happens at `check_availability` time, before any
//! state changes; `register` itself never fails — a cross-package
//! overwrite is logged and ownership moves, which is what upgrade and
//! rollback rely on.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::manifest::PackageManifest;

/// Metadata categories scanned for namespace extraction, in scan order.
pub const METADATA_CATEGORIES: [&str; 10] = [
    "objects",
    "views",
    "pages",
    "flows",
    "workflows",
    "apps",
    "dashboards",
    "reports",
    "actions",
    "agents",
];

/// Ownership record for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    /// The namespace string, `"<category>.<name>"`.
    pub namespace: String,
    /// Owning package id.
    pub package_id: String,
    /// When ownership was (last) taken.
    pub registered_at: DateTime<Utc>,
}

/// One namespace collision found during an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConflict {
    /// The contested namespace.
    pub namespace: String,
    /// The package that currently owns it.
    pub existing_package_id: String,
    /// The package that wants it.
    pub incoming_package_id: String,
    /// A rename the incoming package could use instead.
    pub suggestion: String,
}

/// Result of an availability check over a set of namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    /// True iff no conflicts were found.
    pub available: bool,
    /// Every namespace owned by a different package.
    pub conflicts: Vec<NamespaceConflict>,
}

impl AvailabilityReport {
    /// The rename suggestions, one per conflict.
    pub fn suggestions(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .map(|c| c.suggestion.clone())
            .collect()
    }
}

/// The global namespace → owner map.
#[derive(Default)]
pub struct NamespaceResolver {
    entries: RwLock<HashMap<String, NamespaceEntry>>,
}

impl std::fmt::Debug for NamespaceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = match self.entries.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        };
        f.debug_struct("NamespaceResolver")
            .field("namespaces", &count)
            .finish()
    }
}

impl NamespaceResolver {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of every namespace in `namespaces` for `package_id`.
    ///
    /// Re-registration by the current owner is an idempotent overwrite.
    /// Taking a namespace from a different owner logs a warning but
    /// succeeds — callers that must not steal run `check_availability`
    /// first.
    pub fn register(&self, package_id: &str, namespaces: &[String]) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        for namespace in namespaces {
            if let Some(existing) = entries.get(namespace) {
                if existing.package_id != package_id {
                    warn!(
                        namespace = namespace.as_str(),
                        from = existing.package_id.as_str(),
                        to = package_id,
                        "namespace ownership overwritten"
                    );
                }
            }
            entries.insert(
                namespace.clone(),
                NamespaceEntry {
                    namespace: namespace.clone(),
                    package_id: package_id.to_owned(),
                    registered_at: Utc::now(),
                },
            );
        }
        debug!(package = package_id, count = namespaces.len(), "namespaces registered");
    }

    /// Release every namespace owned by `package_id`, returning them.
    pub fn unregister(&self, package_id: &str) -> Vec<String> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let removed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.package_id == package_id)
            .map(|(namespace, _)| namespace.clone())
            .collect();
        for namespace in &removed {
            entries.remove(namespace);
        }
        debug!(package = package_id, count = removed.len(), "namespaces released");
        removed
    }

    /// Report which of `namespaces` are owned by a package other than
    /// `package_id`, with a rename suggestion for each conflict.
    pub fn check_availability(&self, package_id: &str, namespaces: &[String]) -> AvailabilityReport {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let conflicts: Vec<NamespaceConflict> = namespaces
            .iter()
            .filter_map(|namespace| {
                let existing = entries.get(namespace)?;
                if existing.package_id == package_id {
                    return None;
                }
                Some(NamespaceConflict {
                    namespace: namespace.clone(),
                    existing_package_id: existing.package_id.clone(),
                    incoming_package_id: package_id.to_owned(),
                    suggestion: suggest_alternative(namespace, package_id),
                })
            })
            .collect();

        AvailabilityReport {
            available: conflicts.is_empty(),
            conflicts,
        }
    }

    /// Current owner of `namespace`, if any.
    pub fn owner_of(&self, namespace: &str) -> Option<String> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(namespace).map(|entry| entry.package_id.clone())
    }

    /// Every namespace currently owned by `package_id`, sorted.
    pub fn namespaces_of(&self, package_id: &str) -> Vec<String> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut owned: Vec<String> = entries
            .values()
            .filter(|entry| entry.package_id == package_id)
            .map(|entry| entry.namespace.clone())
            .collect();
        owned.sort();
        owned
    }

    /// Scan a manifest's metadata categories and produce the
    /// `"<category>.<name>"` namespace for every declared item.
    ///
    /// Each category block may be an object keyed by item name or an
    /// array of items carrying a `name` field; both shapes occur in the
    /// wild. Output is sorted within each category (object keys parse
    /// into a sorted map), categories in scan order.
    pub fn extract_namespaces(manifest: &PackageManifest) -> Vec<String> {
        let mut namespaces = Vec::new();
        for category in METADATA_CATEGORIES {
            let Some(block) = manifest.metadata.get(category) else {
                continue;
            };
            match block {
                serde_json::Value::Object(items) => {
                    for name in items.keys() {
                        namespaces.push(format!("{category}.{name}"));
                    }
                }
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(name) = item.get("name").and_then(|v| v.as_str()) {
                            namespaces.push(format!("{category}.{name}"));
                        }
                    }
                }
                _ => {}
            }
        }
        namespaces
    }
}

/// Derive a rename suggestion for a contested namespace: a short slug of
/// the incoming package id, inserted after the category segment.
fn suggest_alternative(namespace: &str, incoming_package_id: &str) -> String {
    let slug = package_slug(incoming_package_id);
    match namespace.split_once('.') {
        Some((category, rest)) => format!("{category}.{slug}_{rest}"),
        None => format!("{slug}_{namespace}"),
    }
}

/// Short slug from a package id: scope prefix stripped, a leading
/// `plugin-` token stripped, separators collapsed to underscores.
fn package_slug(package_id: &str) -> String {
    let unscoped = if package_id.starts_with('@') {
        package_id
            .split_once('/')
            .map_or(&package_id[1..], |(_, rest)| rest)
    } else {
        package_id
    };
    let trimmed = unscoped.strip_prefix("plugin-").unwrap_or(unscoped);
    trimmed
        .chars()
        .map(|c| match c {
            '-' | '.' | '/' | '@' => '_',
            other => other,
        })
        .collect()
}
