//! Database connections.

use crate::engine::{Engine, EngineState, Retired};
use crate::error::{CallbackResult, CoreError, CoreResult};
use crate::events::{VersionChangeEvent, VersionChangeHandler};
use crate::keypath::KeyPath;
use crate::lifecycle;
use crate::object_store::{ObjectStore, StoreParams};
use crate::transaction::{runner, Transaction, TransactionRecord};
use crate::types::{ConnectionId, TransactionId, TransactionMode};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a connection handle still reports after the record is dropped.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSnapshot {
    pub database: String,
    pub version: u64,
    pub store_names: Vec<String>,
}

/// Engine-side record of a connection.
pub(crate) struct ConnectionRecord {
    pub database: String,
    pub version: u64,
    /// Store names as this connection sees them. Refreshed when its own
    /// upgrade commits.
    pub store_names: Vec<String>,
    /// Set by [`Connection::close`]; no new transactions may start.
    pub close_pending: bool,
    /// Set once close is pending and every transaction has finished.
    pub closed: bool,
    pub on_version_change: Option<VersionChangeHandler>,
    pub retired: Retired<ConnectionSnapshot>,
}

impl ConnectionRecord {
    pub(crate) fn new(database: String, version: u64, store_names: Vec<String>) -> Self {
        Self {
            database,
            version,
            store_names,
            close_pending: false,
            closed: false,
            on_version_change: None,
            retired: Retired::default(),
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            database: self.database.clone(),
            version: self.version,
            store_names: self.store_names.clone(),
        }
    }
}

/// Marks a close-pending connection closed once its transactions are done,
/// and wakes any open or delete request waiting on it.
pub(crate) fn close_if_idle(engine: &Arc<Engine>, st: &mut EngineState, id: ConnectionId) {
    let busy = st.has_unfinished_transactions(id);
    let Some(connection) = st.connections.get_mut(&id) else {
        return;
    };
    if !connection.close_pending || connection.closed || busy {
        return;
    }
    connection.closed = true;
    connection.on_version_change = None;
    let database = connection.database.clone();
    debug!(connection = %id, %database, "connection closed");
    lifecycle::connection_closed(engine, st, &database);
    retire(st, id);
}

/// Drops a closed connection, leaving its final state to the handles.
pub(crate) fn retire(st: &mut EngineState, id: ConnectionId) {
    if let Some(record) = st.connections.remove(&id) {
        *record.retired.lock() = Some(record.snapshot());
    }
}

fn upgrade_transaction(st: &EngineState, id: ConnectionId) -> Option<(TransactionId, &TransactionRecord)> {
    st.transactions
        .iter()
        .find(|(_, t)| {
            t.connection == id && t.mode == TransactionMode::VersionChange && !t.is_finished()
        })
        .map(|(tx, t)| (*tx, t))
}

/// Handle to an open connection.
#[derive(Clone)]
pub struct Connection {
    engine: Arc<Engine>,
    id: ConnectionId,
    retired: Retired<ConnectionSnapshot>,
}

impl Connection {
    pub(crate) fn from_parts(
        engine: Arc<Engine>,
        id: ConnectionId,
        retired: Retired<ConnectionSnapshot>,
    ) -> Self {
        Self {
            engine,
            id,
            retired,
        }
    }

    /// Builds a handle for a connection the engine still holds.
    pub(crate) fn lookup(engine: &Arc<Engine>, st: &EngineState, id: ConnectionId) -> Option<Self> {
        let record = st.connections.get(&id)?;
        Some(Self::from_parts(
            Arc::clone(engine),
            id,
            Arc::clone(&record.retired),
        ))
    }

    fn snapshot(&self) -> Option<ConnectionSnapshot> {
        let st = self.engine.state();
        match st.connections.get(&self.id) {
            Some(record) => Some(record.snapshot()),
            None => self.retired.lock().clone(),
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> String {
        self.snapshot().map(|c| c.database).unwrap_or_default()
    }

    /// Returns the version the connection was opened at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot().map_or(0, |c| c.version)
    }

    /// Returns true once the connection is fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.engine
            .state()
            .connections
            .get(&self.id)
            .map_or(true, |c| c.closed)
    }

    /// Names of the stores this connection sees, sorted.
    ///
    /// During the connection's own upgrade these follow the schema
    /// changes as they happen; otherwise they are fixed from the open, or
    /// from the last upgrade this connection committed.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        let st = self.engine.state();
        let Some(record) = st.connections.get(&self.id) else {
            return self
                .retired
                .lock()
                .as_ref()
                .map(|c| c.store_names.clone())
                .unwrap_or_default();
        };
        if upgrade_transaction(&st, self.id).is_some() {
            return st
                .databases
                .get(&record.database)
                .map(|db| db.store_names())
                .unwrap_or_default();
        }
        record.store_names.clone()
    }

    /// Starts a transaction over the named stores.
    ///
    /// # Errors
    ///
    /// Type error for [`TransactionMode::VersionChange`]; invalid state
    /// during an upgrade or after [`close`](Self::close); not found for an
    /// unknown store; invalid access for an empty scope.
    pub fn transaction(&self, names: &[&str], mode: TransactionMode) -> CoreResult<Transaction> {
        if mode == TransactionMode::VersionChange {
            return Err(CoreError::type_error(
                "upgrade transactions are only created by open requests",
            ));
        }
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        if upgrade_transaction(st, self.id).is_some() {
            return Err(CoreError::invalid_state(
                "cannot start a transaction while an upgrade is running",
            ));
        }
        let connection = st
            .connections
            .get(&self.id)
            .ok_or_else(|| CoreError::invalid_state("unknown connection"))?;
        if connection.close_pending {
            return Err(CoreError::invalid_state("connection is closing"));
        }
        let database = connection.database.clone();
        let mut scope: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        scope.sort();
        scope.dedup();
        if let Some(db) = st.databases.get(&database) {
            if let Some(missing) = scope.iter().find(|n| !db.stores.contains_key(n.as_str())) {
                return Err(CoreError::not_found(format!("object store {missing}")));
            }
        }
        if scope.is_empty() {
            return Err(CoreError::invalid_access("a transaction needs at least one store"));
        }
        let tx = runner::create(&self.engine, st, self.id, &database, mode, scope);
        Transaction::lookup(&self.engine, st, tx)
    }

    /// Creates an object store. Only allowed during an upgrade.
    ///
    /// # Errors
    ///
    /// Invalid state outside an upgrade; transaction inactive; syntax
    /// error for a bad key path; constraint error if the name is taken;
    /// invalid access for a generator with an empty or composite key path.
    pub fn create_object_store(&self, name: &str, params: StoreParams) -> CoreResult<ObjectStore> {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        let (tx, record) = upgrade_transaction(st, self.id).ok_or_else(|| {
            CoreError::invalid_state("object stores can only be created during an upgrade")
        })?;
        record.ensure_active()?;
        let database = record.database.clone();
        if let Some(path) = &params.key_path {
            path.validate()?;
        }
        if st
            .databases
            .get(&database)
            .is_some_and(|db| db.stores.contains_key(name))
        {
            return Err(CoreError::constraint(format!(
                "object store {name} already exists"
            )));
        }
        let generator_path_ok = match &params.key_path {
            Some(KeyPath::Sequence(_)) => false,
            Some(KeyPath::String(path)) => !path.is_empty(),
            None => true,
        };
        if params.auto_increment && !generator_path_ok {
            return Err(CoreError::invalid_access(
                "a key generator needs a non-empty, non-composite key path",
            ));
        }
        debug!(%database, store = name, "creating object store");
        let store = st.create_store(
            tx,
            &database,
            name,
            params.key_path,
            params.auto_increment,
        )?;
        let transaction = Transaction::lookup(&self.engine, st, tx)?;
        Ok(ObjectStore::from_parts(transaction, store))
    }

    /// Deletes an object store. Only allowed during an upgrade.
    ///
    /// # Errors
    ///
    /// Invalid state outside an upgrade; transaction inactive; not found
    /// if there is no such store.
    pub fn delete_object_store(&self, name: &str) -> CoreResult<()> {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        let (tx, record) = upgrade_transaction(st, self.id).ok_or_else(|| {
            CoreError::invalid_state("object stores can only be deleted during an upgrade")
        })?;
        record.ensure_active()?;
        let store = st
            .databases
            .get(&record.database)
            .and_then(|db| db.stores.get(name).copied())
            .ok_or_else(|| CoreError::not_found(format!("object store {name}")))?;
        debug!(database = %record.database, store = name, "deleting object store");
        st.delete_store(tx, store)
    }

    /// Closes the connection once its transactions finish. New
    /// transactions are refused immediately.
    pub fn close(&self) {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        if let Some(connection) = st.connections.get_mut(&self.id) {
            connection.close_pending = true;
        }
        close_if_idle(&self.engine, st, self.id);
    }

    /// Sets the callback run when another request wants to upgrade or
    /// delete the database. It usually calls [`close`](Self::close).
    pub fn on_version_change(
        &self,
        handler: impl FnMut(&VersionChangeEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(connection) = self.engine.state().connections.get_mut(&self.id) {
            if !connection.closed {
                connection.on_version_change = Some(Box::new(handler));
            }
        }
        self
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine) && self.id == other.id
    }
}

impl Eq for Connection {}
