//! Shared fixtures for kernel integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use objectstack_kernel::kernel::{Plugin, PluginContext};

/// Shared, ordered record of lifecycle events (`"init:a"`, `"start:a"`,
/// `"destroy:a"`).
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Create an empty event log.
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Read the log contents.
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().expect("test lock").clone()
}

/// A plugin that records every lifecycle call and can be told to fail
/// or stall in any phase.
pub struct RecordingPlugin {
    name: String,
    dependencies: Vec<String>,
    log: EventLog,
    fail_init: bool,
    fail_start: bool,
    fail_destroy: bool,
    init_delay: Option<Duration>,
}

impl RecordingPlugin {
    /// A well-behaved plugin.
    pub fn new(name: &str, dependencies: &[&str], log: &EventLog) -> Self {
        Self {
            name: name.to_owned(),
            dependencies: dependencies.iter().map(|d| (*d).to_owned()).collect(),
            log: Arc::clone(log),
            fail_init: false,
            fail_start: false,
            fail_destroy: false,
            init_delay: None,
        }
    }

    /// Fail during `init` (after recording the attempt).
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fail during `start`.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail during `destroy`.
    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    /// Sleep this long inside `init` before returning.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    fn record(&self, phase: &str) {
        self.log
            .lock()
            .expect("test lock")
            .push(format!("{phase}:{}", self.name));
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    async fn init(&self, _context: &dyn PluginContext) -> anyhow::Result<()> {
        self.record("init");
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_init {
            anyhow::bail!("{} refused to init", self.name);
        }
        Ok(())
    }

    async fn start(&self, _context: &dyn PluginContext) -> anyhow::Result<()> {
        self.record("start");
        if self.fail_start {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.record("destroy");
        if self.fail_destroy {
            anyhow::bail!("{} refused to die", self.name);
        }
        Ok(())
    }
}
