//! Kernel core — plugin registry, lifecycle state machine, service
//! registry, hook bus, and the capability boundary between plugins
//! and the host.
//!
//! All inter-plugin access control happens here: plugins only ever see
//! a [`context::SecureContext`], never the raw kernel internals.

pub mod context;
pub mod core;
pub mod hooks;
pub mod permissions;
pub mod plugin;
pub mod services;

pub use context::{PluginContext, SecureContext};
pub use core::{Kernel, KernelError, KernelHandle, KernelOptions, KernelSnapshot, LifecyclePhase};
pub use hooks::{ErrorPolicy, HookBus, HookHandler};
pub use permissions::{
    PermissionEnforcer, PermissionError, ResourceKind, HOOK_WILDCARD_PROTOCOL,
    SERVICE_WILDCARD_PROTOCOL,
};
pub use plugin::{Plugin, PluginInfo};
pub use services::{service_as, MapServiceRegistry, Service, ServiceError, ServiceRegistry};
