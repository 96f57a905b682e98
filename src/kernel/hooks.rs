//! Hook bus — named events with ordered, asynchronous handlers.
//!
//! Handlers for the same event run strictly sequentially, in registration
//! order. Two dispatch policies exist: lifecycle-style fail-fast, which
//! stops at the first handler error, and hook-style isolation, which logs
//! each failure and keeps going so one broken handler cannot starve the
//! rest.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tracing::warn;

/// Future returned by a hook handler.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// An event handler: borrows the trigger arguments, returns a future.
pub type HookHandler = Arc<dyn Fn(&[serde_json::Value]) -> HookFuture + Send + Sync>;

/// What to do when a handler in a dispatch sequence fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop at the first error and return it. Used for lifecycle steps.
    FailFast,
    /// Log the error and continue with the remaining handlers.
    Isolate,
}

/// Ordered registry of event handlers.
pub struct HookBus {
    handlers: RwLock<HashMap<String, Vec<HookHandler>>>,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events = match self.handlers.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        };
        f.debug_struct("HookBus").field("events", &events).finish()
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

impl HookBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` for `event`, after any handlers already present.
    pub fn register(&self, event: &str, handler: HookHandler) {
        let mut map = match self.handlers.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(event.to_owned()).or_default().push(handler);
    }

    /// Wrap an async closure into a [`HookHandler`].
    ///
    /// Arguments are cloned into the handler so the returned future is
    /// `'static`.
    pub fn handler<F, Fut>(f: F) -> HookHandler
    where
        F: Fn(Vec<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(move |args: &[serde_json::Value]| {
            let fut = f(args.to_vec());
            Box::pin(fut) as HookFuture
        })
    }

    /// Number of handlers registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        match self.handlers.read() {
            Ok(map) => map.get(event).map_or(0, Vec::len),
            Err(_) => 0,
        }
    }

    /// Invoke every handler for `event` in registration order under the
    /// given error policy.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::FailFast`], returns the first handler error.
    /// Under [`ErrorPolicy::Isolate`], handler errors are logged and this
    /// always returns `Ok`.
    pub async fn dispatch(
        &self,
        event: &str,
        args: &[serde_json::Value],
        policy: ErrorPolicy,
    ) -> anyhow::Result<()> {
        // Snapshot the handler list so registrations during dispatch do
        // not deadlock or affect this invocation.
        let handlers: Vec<HookHandler> = match self.handlers.read() {
            Ok(map) => map.get(event).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        for (index, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(args).await {
                match policy {
                    ErrorPolicy::FailFast => return Err(e),
                    ErrorPolicy::Isolate => {
                        warn!(event, handler = index, error = %e, "hook handler failed");
                    }
                }
            }
        }

        Ok(())
    }

    /// Invoke every handler for `event`, isolating per-handler failures.
    pub async fn trigger(&self, event: &str, args: &[serde_json::Value]) {
        // Isolate never surfaces an error.
        let _ = self.dispatch(event, args, ErrorPolicy::Isolate).await;
    }
}
