//! Kernel lifecycle — plugin registry, dependency-ordered bootstrap,
//! reverse-ordered shutdown.
//!
//! Bootstrap is fail-fast: the first `init`/`start` error (or timeout)
//! aborts startup and the kernel stays in `initializing`. Shutdown is
//! the opposite: every plugin's `destroy` runs even if earlier ones
//! fail, with errors logged and swallowed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::resolver::{resolve_order, GraphNode, ResolveError};
use crate::types::{Capability, GrantPolicy, KernelState};

use super::context::{KernelContext, SecureContext};
use super::hooks::{HookBus, HookHandler};
use super::permissions::{
    PermissionEnforcer, PermissionError, HOOK_WILDCARD_PROTOCOL, SERVICE_WILDCARD_PROTOCOL,
};
use super::plugin::{Plugin, PluginInfo};
use super::services::{MapServiceRegistry, Service, ServiceError, ServiceRegistry};

/// Which lifecycle method a plugin was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// `init`, during bootstrap.
    Init,
    /// `start`, during bootstrap.
    Start,
    /// `destroy`, during shutdown or startup rollback.
    Destroy,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Kernel operation failure.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The operation is not legal in the kernel's current state.
    #[error("invalid kernel state: expected {expected}, was {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: KernelState,
        /// State the kernel was actually in.
        actual: KernelState,
    },
    /// A plugin with this name is already registered.
    #[error("plugin '{name}' is already registered")]
    DuplicatePlugin {
        /// The contested plugin name.
        name: String,
    },
    /// Service registry failure.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// Capability check failure.
    #[error(transparent)]
    Permission(#[from] PermissionError),
    /// Dependency graph failure.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// A plugin lifecycle method returned an error.
    #[error("plugin '{plugin}' failed during {phase}: {source}")]
    Lifecycle {
        /// The failing plugin.
        plugin: String,
        /// The lifecycle method that failed.
        phase: LifecyclePhase,
        /// The plugin-supplied error.
        #[source]
        source: anyhow::Error,
    },
    /// A plugin lifecycle method exceeded the configured startup timeout.
    #[error("plugin '{plugin}' timed out after {timeout:?} during {phase}")]
    LifecycleTimeout {
        /// The timed-out plugin.
        plugin: String,
        /// The lifecycle method that timed out.
        phase: LifecyclePhase,
        /// The configured limit.
        timeout: Duration,
    },
}

/// Startup orchestration options, fixed at kernel construction.
#[derive(Debug, Clone, Default)]
pub struct KernelOptions {
    /// Start mutually-independent plugins concurrently. Dependency order
    /// is still respected as a partial order.
    pub parallel: bool,
    /// Per-plugin limit on `init` and `start`. `None` means unbounded.
    pub startup_timeout: Option<Duration>,
    /// On a bootstrap failure, destroy already-initialised plugins in
    /// reverse order before returning the error.
    pub rollback_on_failure: bool,
    /// Capability grant policy applied at bootstrap.
    pub grant_policy: GrantPolicy,
}

/// Read-only view of the kernel's state and plugin registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSnapshot {
    /// Lifecycle state at snapshot time.
    pub state: KernelState,
    /// Registered plugins, in registration order.
    pub plugins: Vec<PluginInfo>,
}

/// Cheap cloneable read-only handle onto a kernel, available to plugins
/// through their context.
#[derive(Clone)]
pub struct KernelHandle {
    state: Arc<RwLock<KernelState>>,
    plugins: Arc<RwLock<Vec<Arc<dyn Plugin>>>>,
}

impl KernelHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> KernelState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Registered plugins, in registration order.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let plugins = match self.plugins.read() {
            Ok(plugins) => plugins,
            Err(poisoned) => poisoned.into_inner(),
        };
        plugins
            .iter()
            .map(|p| PluginInfo {
                name: p.name().to_owned(),
                version: p.version().to_owned(),
            })
            .collect()
    }

    /// Combined state + plugin snapshot.
    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            state: self.state(),
            plugins: self.plugins(),
        }
    }
}

/// The microkernel: owns the plugin registry, the service registry, the
/// hook bus, and the permission table.
///
/// Every instance is explicitly constructed; there is no ambient global
/// kernel. Collaborators receive the pieces they need by reference.
pub struct Kernel {
    state: Arc<RwLock<KernelState>>,
    plugins: Arc<RwLock<Vec<Arc<dyn Plugin>>>>,
    services: Arc<dyn ServiceRegistry>,
    hooks: Arc<HookBus>,
    permissions: Arc<PermissionEnforcer>,
    options: KernelOptions,
    /// Names in successful init order, recorded at bootstrap for
    /// reverse-order shutdown.
    boot_order: RwLock<Vec<String>>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state())
            .field("plugins", &self.handle().plugins().len())
            .finish()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelOptions::default())
    }
}

impl Kernel {
    /// Create a kernel with the in-memory service registry.
    pub fn new(options: KernelOptions) -> Self {
        Self::with_registry(Arc::new(MapServiceRegistry::new()), options)
    }

    /// Create a kernel over a caller-supplied service registry. The
    /// registry abstraction is fixed here, once, for the kernel's life.
    pub fn with_registry(services: Arc<dyn ServiceRegistry>, options: KernelOptions) -> Self {
        Self {
            state: Arc::new(RwLock::new(KernelState::Idle)),
            plugins: Arc::new(RwLock::new(Vec::new())),
            services,
            hooks: Arc::new(HookBus::new()),
            permissions: Arc::new(PermissionEnforcer::new()),
            options,
            boot_order: RwLock::new(Vec::new()),
        }
    }

    // ── Registration ──

    /// Register a plugin. Legal only while the kernel is idle.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidState`] outside `idle`, or
    /// [`KernelError::DuplicatePlugin`] if the name is taken.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), KernelError> {
        let state = self.state();
        if state != KernelState::Idle {
            return Err(KernelError::InvalidState {
                expected: KernelState::Idle,
                actual: state,
            });
        }

        let mut plugins = match self.plugins.write() {
            Ok(plugins) => plugins,
            Err(poisoned) => poisoned.into_inner(),
        };
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(KernelError::DuplicatePlugin {
                name: plugin.name().to_owned(),
            });
        }

        info!(plugin = plugin.name(), version = plugin.version(), "plugin registered");
        plugins.push(plugin);
        Ok(())
    }

    // ── Lifecycle ──

    /// Initialise and start every registered plugin in dependency order.
    ///
    /// On success the kernel transitions to `running`. On the first
    /// failure the kernel stays in `initializing` and, if
    /// [`KernelOptions::rollback_on_failure`] is set, already-initialised
    /// plugins are destroyed in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidState`] outside `idle`, a
    /// [`KernelError::Resolve`] for a bad dependency graph, or the first
    /// lifecycle failure.
    pub async fn bootstrap(&self) -> Result<(), KernelError> {
        self.transition(KernelState::Idle, KernelState::Initializing)?;

        let plugins: Vec<Arc<dyn Plugin>> = {
            let plugins = match self.plugins.read() {
                Ok(plugins) => plugins,
                Err(poisoned) => poisoned.into_inner(),
            };
            plugins.clone()
        };

        let nodes: Vec<GraphNode> = plugins
            .iter()
            .map(|p| GraphNode::new(p.name(), p.dependencies()))
            .collect();
        let order = resolve_order(&nodes)?;

        {
            let mut boot_order = match self.boot_order.write() {
                Ok(boot_order) => boot_order,
                Err(poisoned) => poisoned.into_inner(),
            };
            boot_order.clone_from(&order);
        }

        self.apply_grant_policy(&plugins);

        let by_name: HashMap<&str, &Arc<dyn Plugin>> =
            plugins.iter().map(|p| (p.name(), p)).collect();
        let base = Arc::new(KernelContext::new(
            Arc::clone(&self.services),
            Arc::clone(&self.hooks),
            self.handle(),
        ));
        let ordered: Vec<(Arc<dyn Plugin>, Arc<SecureContext>)> = order
            .iter()
            .filter_map(|name| by_name.get(name.as_str()))
            .map(|p| {
                let ctx = Arc::new(SecureContext::new(
                    p.name(),
                    Arc::clone(&base),
                    Arc::clone(&self.permissions),
                ));
                (Arc::clone(p), ctx)
            })
            .collect();

        // Plugins whose init completed, in completion order, for rollback.
        let mut initialised: Vec<Arc<dyn Plugin>> = Vec::with_capacity(ordered.len());

        if let Err(e) = self.run_phase(LifecyclePhase::Init, &ordered, &mut initialised).await {
            self.rollback_started(&initialised).await;
            return Err(e);
        }

        let mut started = Vec::new();
        if let Err(e) = self.run_phase(LifecyclePhase::Start, &ordered, &mut started).await {
            self.rollback_started(&initialised).await;
            return Err(e);
        }

        self.transition(KernelState::Initializing, KernelState::Running)?;
        info!(plugins = ordered.len(), "kernel bootstrap complete");
        Ok(())
    }

    /// Destroy every plugin in reverse init order, then stop.
    ///
    /// Per-plugin destroy errors are logged and swallowed so teardown
    /// never abandons the remaining plugins.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidState`] if the kernel is not running.
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        self.transition(KernelState::Running, KernelState::Stopping)?;

        let order: Vec<String> = match self.boot_order.read() {
            Ok(order) => order.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let plugins: Vec<Arc<dyn Plugin>> = {
            let plugins = match self.plugins.read() {
                Ok(plugins) => plugins,
                Err(poisoned) => poisoned.into_inner(),
            };
            plugins.clone()
        };
        let by_name: HashMap<&str, &Arc<dyn Plugin>> =
            plugins.iter().map(|p| (p.name(), p)).collect();

        for name in order.iter().rev() {
            let Some(plugin) = by_name.get(name.as_str()) else {
                continue;
            };
            if let Err(e) = plugin.destroy().await {
                warn!(plugin = name.as_str(), error = %e, "plugin destroy failed");
            }
        }

        self.transition(KernelState::Stopping, KernelState::Stopped)?;
        info!("kernel stopped");
        Ok(())
    }

    // ── Services and hooks (host surface) ──

    /// Register a host-provided service.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Service`] if the name is already taken.
    pub fn register_service(&self, name: &str, service: Service) -> Result<(), KernelError> {
        self.services.register(name, service)?;
        Ok(())
    }

    /// Look up a service, unchecked. Host-side only; plugins go through
    /// their [`SecureContext`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Service`] if no such service exists.
    pub fn get_service(&self, name: &str) -> Result<Service, KernelError> {
        Ok(self.services.get(name)?)
    }

    /// Register a host-side event handler.
    pub fn hook(&self, event: &str, handler: HookHandler) {
        self.hooks.register(event, handler);
    }

    /// Trigger an event from the host, isolating handler failures.
    pub async fn trigger(&self, event: &str, args: &[serde_json::Value]) {
        self.hooks.trigger(event, args).await;
    }

    // ── Introspection ──

    /// Current lifecycle state.
    pub fn state(&self) -> KernelState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Read-only snapshot of state and registered plugins.
    pub fn snapshot(&self) -> KernelSnapshot {
        self.handle().snapshot()
    }

    /// Cheap cloneable read-only handle.
    pub fn handle(&self) -> KernelHandle {
        KernelHandle {
            state: Arc::clone(&self.state),
            plugins: Arc::clone(&self.plugins),
        }
    }

    /// The kernel's permission table, for registering explicit grants
    /// before bootstrap.
    pub fn permissions(&self) -> Arc<PermissionEnforcer> {
        Arc::clone(&self.permissions)
    }

    // ── Internals ──

    fn transition(&self, from: KernelState, to: KernelState) -> Result<(), KernelError> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state != from {
            return Err(KernelError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        info!(from = %from, to = %to, "kernel state transition");
        Ok(())
    }

    fn apply_grant_policy(&self, plugins: &[Arc<dyn Plugin>]) {
        info!(policy = ?self.options.grant_policy, "applying grant policy");
        if self.options.grant_policy != GrantPolicy::Auto {
            return;
        }
        for plugin in plugins {
            // Auto mode fills in wildcards only where the host granted
            // nothing explicit.
            if !self.permissions.has_permissions(plugin.name()) {
                self.permissions.register_plugin_permissions(
                    plugin.name(),
                    vec![
                        Capability::new(SERVICE_WILDCARD_PROTOCOL),
                        Capability::new(HOOK_WILDCARD_PROTOCOL),
                    ],
                );
            }
        }
    }

    /// Run one lifecycle phase over `ordered`, fail-fast, appending each
    /// plugin that completed the phase to `completed`.
    async fn run_phase(
        &self,
        phase: LifecyclePhase,
        ordered: &[(Arc<dyn Plugin>, Arc<SecureContext>)],
        completed: &mut Vec<Arc<dyn Plugin>>,
    ) -> Result<(), KernelError> {
        if self.options.parallel {
            self.run_phase_parallel(phase, ordered, completed).await
        } else {
            for (plugin, ctx) in ordered {
                run_lifecycle(
                    Arc::clone(plugin),
                    Arc::clone(ctx),
                    phase,
                    self.options.startup_timeout,
                )
                .await?;
                completed.push(Arc::clone(plugin));
            }
            Ok(())
        }
    }

    /// Parallel phase execution: plugins are grouped into stages where
    /// every dependency lives in an earlier stage; each stage runs
    /// concurrently, stages run in sequence.
    async fn run_phase_parallel(
        &self,
        phase: LifecyclePhase,
        ordered: &[(Arc<dyn Plugin>, Arc<SecureContext>)],
        completed: &mut Vec<Arc<dyn Plugin>>,
    ) -> Result<(), KernelError> {
        for stage in stage_partition(ordered) {
            let mut set: JoinSet<(usize, Result<(), KernelError>)> = JoinSet::new();
            for index in stage {
                let (plugin, ctx) = &ordered[index];
                let plugin = Arc::clone(plugin);
                let ctx = Arc::clone(ctx);
                let timeout = self.options.startup_timeout;
                set.spawn(async move {
                    let result = run_lifecycle(plugin, ctx, phase, timeout).await;
                    (index, result)
                });
            }

            let mut outcomes = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        warn!(error = %e, "lifecycle task aborted");
                    }
                }
            }
            // Deterministic: report the failure of the earliest plugin in
            // dependency order, record successes for rollback.
            outcomes.sort_by_key(|(index, _)| *index);
            let mut first_error = None;
            for (index, result) in outcomes {
                match result {
                    Ok(()) => completed.push(Arc::clone(&ordered[index].0)),
                    Err(e) if first_error.is_none() => first_error = Some(e),
                    Err(_) => {}
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Destroy `initialised` plugins in reverse order, isolating errors.
    async fn rollback_started(&self, initialised: &[Arc<dyn Plugin>]) {
        if !self.options.rollback_on_failure {
            return;
        }
        warn!(count = initialised.len(), "rolling back started plugins");
        for plugin in initialised.iter().rev() {
            if let Err(e) = plugin.destroy().await {
                warn!(plugin = plugin.name(), error = %e, "rollback destroy failed");
            }
        }
    }
}

/// Run one plugin lifecycle method, wrapping errors and enforcing the
/// optional startup timeout.
async fn run_lifecycle(
    plugin: Arc<dyn Plugin>,
    ctx: Arc<SecureContext>,
    phase: LifecyclePhase,
    timeout: Option<Duration>,
) -> Result<(), KernelError> {
    let name = plugin.name().to_owned();
    let call = async {
        match phase {
            LifecyclePhase::Init => plugin.init(ctx.as_ref()).await,
            LifecyclePhase::Start => plugin.start(ctx.as_ref()).await,
            LifecyclePhase::Destroy => plugin.destroy().await,
        }
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                return Err(KernelError::LifecycleTimeout {
                    plugin: name,
                    phase,
                    timeout: limit,
                })
            }
        },
        None => call.await,
    };

    result.map_err(|e| KernelError::Lifecycle {
        plugin: name,
        phase,
        source: e,
    })
}

/// Group `ordered` (a topological order) into stages: a plugin's stage is
/// one past the deepest stage among its dependencies.
fn stage_partition(ordered: &[(Arc<dyn Plugin>, Arc<SecureContext>)]) -> Vec<Vec<usize>> {
    let mut level_of: HashMap<String, usize> = HashMap::with_capacity(ordered.len());
    let mut stages: Vec<Vec<usize>> = Vec::new();

    for (index, (plugin, _)) in ordered.iter().enumerate() {
        let level = plugin
            .dependencies()
            .iter()
            .filter_map(|dep| level_of.get(dep))
            .max()
            .map_or(0, |deepest| deepest + 1);
        level_of.insert(plugin.name().to_owned(), level);
        if stages.len() <= level {
            stages.resize_with(level + 1, Vec::new);
        }
        stages[level].push(index);
    }

    stages
}
