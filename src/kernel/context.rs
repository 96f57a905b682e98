//! Runtime contexts handed to plugins.
//!
//! [`KernelContext`] is the raw surface over the kernel's registries;
//! [`SecureContext`] wraps it with capability checks for one plugin.
//! The kernel only ever gives plugins the secure wrapper — this is the
//! sole enforcement point.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::core::{KernelError, KernelHandle};
use super::hooks::{HookBus, HookHandler};
use super::permissions::PermissionEnforcer;
use super::services::{Service, ServiceRegistry};

/// The runtime surface a plugin sees.
///
/// Logging is ambient via `tracing`, so the context carries no logger
/// handle; everything else from the plugin contract lives here.
#[async_trait]
pub trait PluginContext: Send + Sync {
    /// Register a service under a unique name.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Service`] if the name is already taken.
    fn register_service(&self, name: &str, service: Service) -> Result<(), KernelError>;

    /// Look up a service by name.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Permission`] if the caller lacks a matching
    /// capability, or [`KernelError::Service`] if no such service exists.
    fn get_service(&self, name: &str) -> Result<Service, KernelError>;

    /// Snapshot of the visible services, keyed by name.
    fn get_services(&self) -> HashMap<String, Service>;

    /// Register an event handler. Handlers run in registration order.
    fn hook(&self, event: &str, handler: HookHandler);

    /// Trigger an event; handler failures are isolated and logged.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Permission`] if the caller lacks a matching
    /// capability for the event.
    async fn trigger(&self, event: &str, args: &[serde_json::Value]) -> Result<(), KernelError>;

    /// Read-only handle onto the owning kernel.
    fn kernel(&self) -> KernelHandle;
}

/// Unchecked context over the kernel's registries.
///
/// Constructed only by the kernel and always wrapped in a
/// [`SecureContext`] before a plugin sees it.
pub struct KernelContext {
    services: Arc<dyn ServiceRegistry>,
    hooks: Arc<HookBus>,
    handle: KernelHandle,
}

impl KernelContext {
    pub(crate) fn new(
        services: Arc<dyn ServiceRegistry>,
        hooks: Arc<HookBus>,
        handle: KernelHandle,
    ) -> Self {
        Self {
            services,
            hooks,
            handle,
        }
    }
}

#[async_trait]
impl PluginContext for KernelContext {
    fn register_service(&self, name: &str, service: Service) -> Result<(), KernelError> {
        self.services.register(name, service)?;
        Ok(())
    }

    fn get_service(&self, name: &str) -> Result<Service, KernelError> {
        Ok(self.services.get(name)?)
    }

    fn get_services(&self) -> HashMap<String, Service> {
        self.services.snapshot()
    }

    fn hook(&self, event: &str, handler: HookHandler) {
        self.hooks.register(event, handler);
    }

    async fn trigger(&self, event: &str, args: &[serde_json::Value]) -> Result<(), KernelError> {
        self.hooks.trigger(event, args).await;
        Ok(())
    }

    fn kernel(&self) -> KernelHandle {
        self.handle.clone()
    }
}

/// Capability-checking wrapper around [`KernelContext`] for one plugin.
///
/// `get_service` and `trigger` consult the permission table before
/// delegating; service registration and hook registration pass through.
/// The service snapshot is filtered to what the plugin may access, so a
/// plugin can never observe a service it could not `get_service`.
pub struct SecureContext {
    plugin: String,
    base: Arc<KernelContext>,
    permissions: Arc<PermissionEnforcer>,
}

impl SecureContext {
    pub(crate) fn new(
        plugin: impl Into<String>,
        base: Arc<KernelContext>,
        permissions: Arc<PermissionEnforcer>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            base,
            permissions,
        }
    }

    /// Name of the plugin this context belongs to.
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }
}

#[async_trait]
impl PluginContext for SecureContext {
    fn register_service(&self, name: &str, service: Service) -> Result<(), KernelError> {
        self.base.register_service(name, service)
    }

    fn get_service(&self, name: &str) -> Result<Service, KernelError> {
        self.permissions.enforce_service_access(&self.plugin, name)?;
        self.base.get_service(name)
    }

    fn get_services(&self) -> HashMap<String, Service> {
        self.base
            .get_services()
            .into_iter()
            .filter(|(name, _)| {
                self.permissions
                    .enforce_service_access(&self.plugin, name)
                    .is_ok()
            })
            .collect()
    }

    fn hook(&self, event: &str, handler: HookHandler) {
        self.base.hook(event, handler);
    }

    async fn trigger(&self, event: &str, args: &[serde_json::Value]) -> Result<(), KernelError> {
        self.permissions.enforce_hook_trigger(&self.plugin, event)?;
        self.base.trigger(event, args).await
    }

    fn kernel(&self) -> KernelHandle {
        self.base.kernel()
    }
}
