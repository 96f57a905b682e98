//! Capability table and enforcement — who may touch which service or hook.
//!
//! Each plugin holds a set of [`Capability`] grants. A grant's protocol
//! identifier names a resource kind (`service` or `hook`) and a resource
//! name; the literal resource `all` is the wildcard for its kind.
//! Matching is exact-segment or wildcard only — never prefix or
//! substring.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use crate::types::Capability;

/// The protocol-id segment separating the issuer domain from the target.
const PROTOCOL_MARKER: &str = "protocol";

/// Wildcard resource name.
const WILDCARD: &str = "all";

/// Platform protocol id granting access to every service.
pub const SERVICE_WILDCARD_PROTOCOL: &str = "com.objectstack.protocol.service.all.v1";

/// Platform protocol id granting the right to trigger every hook event.
pub const HOOK_WILDCARD_PROTOCOL: &str = "com.objectstack.protocol.hook.all.v1";

/// Kind of protected resource a capability targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A named service in the service registry.
    Service,
    /// A named hook event on the hook bus.
    Hook,
}

impl ResourceKind {
    fn as_segment(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Hook => "hook",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_segment())
    }
}

/// Access denied by the capability table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// The plugin holds no capability matching the requested resource.
    #[error("permission denied: plugin '{plugin}' may not access {kind} '{resource}'")]
    Denied {
        /// The requesting plugin.
        plugin: String,
        /// Resource kind that was requested.
        kind: ResourceKind,
        /// Resource name that was requested.
        resource: String,
    },
}

/// The parsed target of a protocol identifier.
#[derive(Debug, PartialEq, Eq)]
struct ProtocolTarget {
    kind: String,
    resource: String,
}

/// Parse `<reverse-domain>.protocol.<kind>.<resource>.v<major>`.
///
/// Returns `None` for identifiers that do not follow the shape; such
/// capabilities never match anything.
fn parse_protocol_id(protocol_id: &str) -> Option<ProtocolTarget> {
    let segments: Vec<&str> = protocol_id.split('.').collect();
    let marker = segments.iter().position(|s| *s == PROTOCOL_MARKER)?;

    // Need at least kind, resource, and a trailing version segment.
    let version = segments.last()?;
    let rest = version.strip_prefix('v')?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let kind = segments.get(marker + 1)?;
    let resource_segments = segments.get(marker + 2..segments.len() - 1)?;
    if resource_segments.is_empty() {
        return None;
    }

    Some(ProtocolTarget {
        kind: (*kind).to_owned(),
        resource: resource_segments.join("."),
    })
}

/// Per-plugin capability table and its enforcement methods.
///
/// Mutated only through [`register_plugin_permissions`] and
/// [`revoke_permissions`]; read on every protected access.
///
/// [`register_plugin_permissions`]: PermissionEnforcer::register_plugin_permissions
/// [`revoke_permissions`]: PermissionEnforcer::revoke_permissions
#[derive(Default)]
pub struct PermissionEnforcer {
    table: RwLock<HashMap<String, Vec<Capability>>>,
}

impl std::fmt::Debug for PermissionEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins = match self.table.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        };
        f.debug_struct("PermissionEnforcer")
            .field("plugins", &plugins)
            .finish()
    }
}

impl PermissionEnforcer {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `plugin`'s capability set with `capabilities`.
    pub fn register_plugin_permissions(&self, plugin: &str, capabilities: Vec<Capability>) {
        debug!(plugin, count = capabilities.len(), "registered plugin permissions");
        let mut table = match self.table.write() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.insert(plugin.to_owned(), capabilities);
    }

    /// Remove every capability held by `plugin`. Subsequent enforcement
    /// calls for that plugin always fail.
    pub fn revoke_permissions(&self, plugin: &str) {
        debug!(plugin, "revoked plugin permissions");
        let mut table = match self.table.write() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(plugin);
    }

    /// Whether `plugin` has any registered capability set (even an empty one).
    pub fn has_permissions(&self, plugin: &str) -> bool {
        let table = match self.table.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.contains_key(plugin)
    }

    /// Snapshot of `plugin`'s capabilities.
    pub fn capabilities_of(&self, plugin: &str) -> Vec<Capability> {
        let table = match self.table.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(plugin).cloned().unwrap_or_default()
    }

    /// Authorize `plugin` to access the service named `service`.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::Denied`] unless some capability of the
    /// plugin resolves to this service name or the service wildcard.
    pub fn enforce_service_access(&self, plugin: &str, service: &str) -> Result<(), PermissionError> {
        self.enforce(plugin, ResourceKind::Service, service)
    }

    /// Authorize `plugin` to trigger the hook event named `event`.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::Denied`] unless some capability of the
    /// plugin resolves to this event name or the hook wildcard.
    pub fn enforce_hook_trigger(&self, plugin: &str, event: &str) -> Result<(), PermissionError> {
        self.enforce(plugin, ResourceKind::Hook, event)
    }

    fn enforce(
        &self,
        plugin: &str,
        kind: ResourceKind,
        resource: &str,
    ) -> Result<(), PermissionError> {
        let table = match self.table.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        let granted = table
            .get(plugin)
            .map(|caps| {
                caps.iter().any(|cap| {
                    parse_protocol_id(&cap.protocol_id).is_some_and(|target| {
                        target.kind == kind.as_segment()
                            && (target.resource == resource || target.resource == WILDCARD)
                    })
                })
            })
            .unwrap_or(false);

        if granted {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                plugin: plugin.to_owned(),
                kind,
                resource: resource.to_owned(),
            })
        }
    }
}
