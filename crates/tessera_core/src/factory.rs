//! The entry point: opening, deleting and listing databases.

use crate::config::Config;
use crate::engine::{Engine, EngineState};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{self, DeleteRequest, LifecycleKind, OpenRequest};
use crate::types::{DatabaseInfo, MAX_GENERATED_KEY};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tessera_codec::Value;

/// Owns a set of named databases and the event loop that drives them.
///
/// Every factory is independent: databases opened through one are not
/// visible through another.
///
/// Nothing happens until the event loop runs. Requests are queued by
/// [`open`](Self::open) and friends, and resolved by
/// [`run_until_idle`](Self::run_until_idle):
///
/// ```
/// use tessera_codec::{Key, Value};
/// use tessera_core::{Factory, StoreParams, TransactionMode};
///
/// let factory = Factory::new();
/// let open = factory.open("library", Some(1)).unwrap();
/// open.on_upgrade_needed(|event| {
///     event.connection.create_object_store("books", StoreParams::new())?;
///     Ok(())
/// });
/// factory.run_until_idle();
///
/// let connection = open.result().unwrap();
/// let tx = connection.transaction(&["books"], TransactionMode::ReadWrite).unwrap();
/// tx.object_store("books").unwrap().put(&Value::from("Dune"), Some(Key::from(1))).unwrap();
/// factory.run_until_idle();
/// ```
#[derive(Clone)]
pub struct Factory {
    engine: Arc<Engine>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// Creates a factory with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a factory with the given configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            engine: Engine::new(config),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    /// Requests a connection to `name`.
    ///
    /// With no version, the database is opened at its current version, or
    /// created at the configured default version.
    ///
    /// # Errors
    ///
    /// Type error for version 0 or a version above 2^53 - 1.
    pub fn open(&self, name: &str, version: Option<u64>) -> CoreResult<OpenRequest> {
        if let Some(version) = version {
            if version == 0 || version > MAX_GENERATED_KEY {
                return Err(CoreError::type_error(format!(
                    "version {version} is out of range"
                )));
            }
        }
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        let (id, retired) =
            lifecycle::enqueue(&self.engine, st, name, LifecycleKind::Open { version });
        Ok(OpenRequest::from_parts(Arc::clone(&self.engine), id, retired))
    }

    /// Requests deletion of `name`. Deleting an unknown database succeeds.
    pub fn delete_database(&self, name: &str) -> DeleteRequest {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        let (id, retired) = lifecycle::enqueue(&self.engine, st, name, LifecycleKind::Delete);
        DeleteRequest::from_parts(Arc::clone(&self.engine), id, retired)
    }

    /// Lists databases with a committed version, sorted by name.
    #[must_use]
    pub fn databases(&self) -> Vec<DatabaseInfo> {
        self.engine
            .state()
            .databases
            .iter()
            .filter(|(_, db)| db.exists())
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                version: db.version,
            })
            .collect()
    }

    /// Compares two values as keys.
    ///
    /// # Errors
    ///
    /// Data error if either value is not a valid key.
    pub fn cmp(&self, a: &Value, b: &Value) -> CoreResult<Ordering> {
        Ok(tessera_codec::compare(a, b)?)
    }

    /// Queues a task on the event loop.
    pub fn queue_task(&self, job: impl FnOnce() + Send + 'static) {
        self.engine.events.queue_task(Box::new(job));
    }

    /// Queues a microtask on the event loop.
    pub fn queue_microtask(&self, job: impl FnOnce() + Send + 'static) {
        self.engine.events.queue_microtask(Box::new(job));
    }

    /// Runs one task and the microtasks it queued.
    ///
    /// Returns false if there was nothing to run.
    pub fn run_task(&self) -> bool {
        self.engine.events.run_task()
    }

    /// Runs tasks until the queue is empty or the configured budget is
    /// spent. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        self.engine
            .events
            .run_until_idle(self.engine.config.max_task_turns)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.engine.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::object_store::StoreParams;
    use crate::types::TransactionMode;
    use tessera_codec::Key;

    fn with_store(factory: &Factory, name: &str, stores: &'static [&'static str]) -> crate::Connection {
        let open = factory.open(name, Some(1)).unwrap();
        open.on_upgrade_needed(move |event| {
            for store in stores {
                event.connection.create_object_store(store, StoreParams::new())?;
            }
            Ok(())
        });
        factory.run_until_idle();
        open.result().unwrap()
    }

    #[test]
    fn rejects_out_of_range_versions() {
        let factory = Factory::new();
        assert_eq!(
            factory.open("db", Some(0)).unwrap_err().kind(),
            ErrorKind::Type
        );
        assert_eq!(
            factory
                .open("db", Some(MAX_GENERATED_KEY + 1))
                .unwrap_err()
                .kind(),
            ErrorKind::Type
        );
        assert!(factory.open("db", Some(MAX_GENERATED_KEY)).is_ok());
    }

    #[test]
    fn open_without_version_uses_default() {
        let factory = Factory::with_config(Config::new().default_open_version(3));
        let open = factory.open("db", None).unwrap();
        factory.run_until_idle();
        let connection = open.result().unwrap();
        assert_eq!(connection.version(), 3);
        assert_eq!(
            factory.databases(),
            vec![DatabaseInfo {
                name: "db".to_string(),
                version: 3
            }]
        );
    }

    #[test]
    fn lower_version_fails() {
        let factory = Factory::new();
        factory.open("db", Some(2)).unwrap();
        factory.run_until_idle();
        let open = factory.open("db", Some(1)).unwrap();
        factory.run_until_idle();
        assert_eq!(open.error().map(|e| e.kind()), Some(ErrorKind::Version));
        assert!(open.result().is_none());
    }

    #[test]
    fn delete_unknown_database() {
        let factory = Factory::new();
        let delete = factory.delete_database("nothing");
        factory.run_until_idle();
        assert_eq!(delete.result(), Some(0));
        assert!(factory.databases().is_empty());
    }

    #[test]
    fn compares_keys() {
        let factory = Factory::new();
        assert_eq!(
            factory.cmp(&Value::from(1), &Value::from("a")).unwrap(),
            Ordering::Less
        );
        let err = factory
            .cmp(&Value::Number(f64::NAN), &Value::from(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn factories_are_independent() {
        let first = Factory::new();
        let second = Factory::new();
        first.open("db", Some(1)).unwrap();
        first.run_until_idle();
        assert_eq!(first.databases().len(), 1);
        assert!(second.databases().is_empty());
    }

    #[test]
    fn finished_work_is_released() {
        let factory = Factory::new();
        let connection = with_store(&factory, "db", &["s"]);
        let mut last = None;
        for i in 0..500_i32 {
            let tx = connection
                .transaction(&["s"], TransactionMode::ReadWrite)
                .unwrap();
            let store = tx.object_store("s").unwrap();
            store.put(&Value::from(i), Some(Key::from(i))).unwrap();
            last = Some(store.get(i).unwrap());
            factory.run_until_idle();
        }

        {
            let st = factory.engine.state();
            assert!(st.transactions.is_empty());
            assert!(st.requests.is_empty());
            assert!(st.cursors.is_empty());
            assert!(st.lifecycle.is_empty());
            assert_eq!(st.connections.len(), 1);
        }
        let result = last.unwrap().result().unwrap();
        assert_eq!(result.as_value(), Some(&Value::from(499)));

        connection.close();
        assert!(connection.is_closed());
        assert_eq!(connection.version(), 1);
        assert_eq!(connection.object_store_names(), vec!["s"]);
        assert!(factory.engine.state().connections.is_empty());
    }

    #[test]
    fn deleted_store_records_are_dropped() {
        let factory = Factory::new();
        let connection = with_store(&factory, "db", &["kept", "gone"]);
        let tx = connection
            .transaction(&["gone"], TransactionMode::ReadWrite)
            .unwrap();
        tx.object_store("gone")
            .unwrap()
            .put(&Value::from("x"), Some(Key::from(1)))
            .unwrap();
        factory.run_until_idle();
        connection.close();

        let open = factory.open("db", Some(2)).unwrap();
        open.on_upgrade_needed(|event| {
            event.connection.delete_object_store("gone")?;
            Ok(())
        });
        factory.run_until_idle();
        assert_eq!(open.result().unwrap().object_store_names(), vec!["kept"]);
        let st = factory.engine.state();
        assert_eq!(st.stores.len(), 1);
        assert!(st.stores.values().all(|s| s.name == "kept"));
    }
}
