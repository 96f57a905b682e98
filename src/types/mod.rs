// Core types shared by the kernel and the package manager.

use serde::{Deserialize, Serialize};

/// Kernel lifecycle states, monotonic from `Idle` to `Stopped`.
///
/// Plugin registration is only legal while `Idle`. A failed bootstrap
/// leaves the kernel in `Initializing`; it never reaches `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    /// Constructed, accepting plugin registrations.
    Idle,
    /// Bootstrap in progress — plugins are being initialised.
    Initializing,
    /// All plugins initialised and started.
    Running,
    /// Shutdown in progress — plugins are being destroyed.
    Stopping,
    /// Terminal state. No further transitions.
    Stopped,
}

impl std::fmt::Display for KernelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How completely a plugin implements the protocol behind a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conformance {
    /// Implements the full protocol surface.
    Full,
    /// Implements a subset.
    Partial,
}

/// A granted permission, expressed as a versioned protocol identifier.
///
/// Protocol identifiers are dotted strings of the shape
/// `<reverse-domain>.protocol.<kind>.<resource>.v<major>`, where `<kind>`
/// is `service` or `hook`. A `<resource>` of the literal `all` is the
/// wildcard for that kind, e.g. `com.objectstack.protocol.service.all.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Dotted, versioned protocol identifier.
    pub protocol_id: String,
    /// Declared conformance level.
    pub conformance: Conformance,
    /// Whether the implementation passed certification.
    pub certified: bool,
}

impl Capability {
    /// A full-conformance, uncertified capability for `protocol_id`.
    pub fn new(protocol_id: impl Into<String>) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            conformance: Conformance::Full,
            certified: false,
        }
    }
}

/// Default capability grant policy applied at bootstrap.
///
/// The platform's orchestration examples grant permissions in bulk for
/// convenience; hosts that want a real security boundary must opt into
/// [`GrantPolicy::Explicit`] and register capabilities before bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantPolicy {
    /// Grant the service and hook wildcards to every plugin that has no
    /// explicit capability set. The default.
    #[default]
    Auto,
    /// Grant nothing. Plugins only hold what the host registered.
    Explicit,
}
