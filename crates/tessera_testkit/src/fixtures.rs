//! Test fixtures and factory helpers.
//!
//! Provides a factory wrapper that runs its event loop on demand, and
//! small shared sinks for recording what callbacks saw.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::{Arc, Once};
use tessera_core::{CallbackResult, Config, Connection, Factory, UpgradeEvent};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a tracing subscriber for tests, once per process.
///
/// Output goes through the test harness and is filtered by `RUST_LOG`,
/// defaulting to warnings.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A factory for tests.
pub struct TestFactory {
    factory: Factory,
}

impl TestFactory {
    /// Creates a test factory with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a test factory with the given configuration.
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        Self {
            factory: Factory::with_config(config),
        }
    }

    /// Runs the event loop until nothing is left to do.
    pub fn run(&self) -> usize {
        self.factory.run_until_idle()
    }

    /// Opens `name` at `version`, running `upgrade` if the version is new.
    ///
    /// # Panics
    ///
    /// Panics if the open fails.
    pub fn open_with_upgrade(
        &self,
        name: &str,
        version: u64,
        upgrade: impl FnMut(&UpgradeEvent) -> CallbackResult + Send + 'static,
    ) -> Connection {
        let request = self
            .factory
            .open(name, Some(version))
            .expect("open was rejected");
        request.on_upgrade_needed(upgrade);
        self.run();
        if let Some(err) = request.error() {
            panic!("opening {name} at version {version} failed: {err}");
        }
        request.result().expect("open did not finish")
    }

    /// Opens `name` at its current version.
    ///
    /// # Panics
    ///
    /// Panics if the open fails.
    pub fn open_current(&self, name: &str) -> Connection {
        let request = self.factory.open(name, None).expect("open was rejected");
        self.run();
        request.result().expect("open did not finish")
    }
}

impl Default for TestFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestFactory {
    type Target = Factory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Ordered record of what happened during a test, shared with callbacks.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns a snapshot of the entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns true if `entry` was logged.
    pub fn contains(&self, entry: &str) -> bool {
        self.entries.lock().iter().any(|e| e == entry)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A value captured from inside a callback.
pub struct Captured<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Captured<T> {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Stores a value, replacing any earlier one.
    pub fn set(&self, value: T) {
        *self.inner.lock() = Some(value);
    }

    /// Removes and returns the value.
    pub fn take(&self) -> Option<T> {
        self.inner.lock().take()
    }

    /// Returns true once a value was stored.
    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }
}

impl<T: Clone> Captured<T> {
    /// Returns a copy of the value.
    pub fn get(&self) -> Option<T> {
        self.inner.lock().clone()
    }
}

impl<T> Clone for Captured<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Captured<T> {
    fn default() -> Self {
        Self::new()
    }
}
