//! The plugin contract consumed by the kernel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::PluginContext;

/// An extension unit managed by the kernel.
///
/// Identity is the `name`, unique for the plugin's lifetime in the
/// registry. Dependencies are other plugin names that must complete
/// `init` before this plugin's `init` runs. `init` is the only required
/// lifecycle method; `start` and `destroy` default to no-ops.
///
/// Lifecycle errors are opaque to the kernel, so the methods return
/// [`anyhow::Result`]; the kernel wraps them with the plugin name and
/// the failing phase.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Names of plugins that must initialise before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Initialise the plugin. Runs once during bootstrap, after every
    /// dependency's `init` has completed.
    async fn init(&self, context: &dyn PluginContext) -> anyhow::Result<()>;

    /// Start the plugin. Runs after every plugin has initialised.
    async fn start(&self, _context: &dyn PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tear the plugin down. Runs during shutdown in reverse dependency
    /// order; errors are logged but do not stop the teardown of others.
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Read-only identity of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
}
