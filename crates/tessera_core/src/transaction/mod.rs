//! Transactions.
//!
//! A transaction groups requests against a fixed set of object stores.
//! It is active only while the code that created it runs, and while
//! one of its request callbacks runs; requests may be issued only then.
//! When it runs out of queued requests while inactive, it commits on its
//! own.

pub(crate) mod runner;
mod scheduler;
mod state;

pub use state::TransactionState;
pub(crate) use state::{TransactionRecord, TransactionSnapshot, UndoEntry, UpgradeInfo};

use crate::connection::{Connection, ConnectionSnapshot};
use crate::engine::{Engine, EngineState, Retired};
use crate::error::{CallbackResult, CoreError, CoreResult};
use crate::events::ErrorEvent;
use crate::object_store::ObjectStore;
use crate::types::{ConnectionId, TransactionId, TransactionMode};
use std::fmt;
use std::sync::Arc;

/// Handle to a transaction.
#[derive(Clone)]
pub struct Transaction {
    engine: Arc<Engine>,
    id: TransactionId,
    mode: TransactionMode,
    connection: ConnectionId,
    owner: Retired<ConnectionSnapshot>,
    retired: Retired<TransactionSnapshot>,
}

impl Transaction {
    /// Builds a handle for a transaction the engine still holds.
    pub(crate) fn lookup(
        engine: &Arc<Engine>,
        st: &EngineState,
        id: TransactionId,
    ) -> CoreResult<Self> {
        let record = st.transaction(id)?;
        Ok(Self {
            engine: Arc::clone(engine),
            id,
            mode: record.mode,
            connection: record.connection,
            owner: Arc::clone(&record.owner),
            retired: Arc::clone(&record.retired),
        })
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn read<R>(
        &self,
        live: impl FnOnce(&TransactionRecord) -> R,
        retired: impl FnOnce(&TransactionSnapshot) -> R,
    ) -> Option<R> {
        let st = self.engine.state();
        match st.transactions.get(&self.id) {
            Some(record) => Some(live(record)),
            None => self.retired.lock().as_ref().map(retired),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.read(|t| t.state, |_| TransactionState::Finished)
            .unwrap_or(TransactionState::Finished)
    }

    /// Returns true once the transaction has been allowed to run.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.read(|t| t.started, |t| t.started).unwrap_or(false)
    }

    /// Returns the error that aborted the transaction, if any.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        self.read(|t| t.error.clone(), |t| t.error.clone())
            .flatten()
    }

    /// Returns the connection the transaction belongs to.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        Some(Connection::from_parts(
            Arc::clone(&self.engine),
            self.connection,
            Arc::clone(&self.owner),
        ))
    }

    /// Names of the stores in scope, sorted.
    ///
    /// An upgrade transaction covers every store of its database.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        let st = self.engine.state();
        let Some(record) = st.transactions.get(&self.id) else {
            return self
                .retired
                .lock()
                .as_ref()
                .map(|t| t.store_names.clone())
                .unwrap_or_default();
        };
        if record.mode == TransactionMode::VersionChange {
            st.databases
                .get(&record.database)
                .map(|db| db.store_names())
                .unwrap_or_default()
        } else {
            record.scope.clone()
        }
    }

    /// Returns a handle to a store in scope.
    ///
    /// # Errors
    ///
    /// Invalid state once the transaction has finished; not found if the
    /// store is out of scope or does not exist.
    pub fn object_store(&self, name: &str) -> CoreResult<ObjectStore> {
        let st = self.engine.state();
        let record = st
            .transactions
            .get(&self.id)
            .filter(|t| !t.is_finished())
            .ok_or_else(|| CoreError::invalid_state("transaction has finished"))?;
        let store = record
            .covers(name)
            .then(|| st.databases.get(&record.database))
            .flatten()
            .and_then(|db| db.stores.get(name).copied())
            .ok_or_else(|| CoreError::not_found(format!("object store {name}")))?;
        Ok(ObjectStore::from_parts(self.clone(), store))
    }

    /// Aborts the transaction, reverting its changes.
    ///
    /// # Errors
    ///
    /// Invalid state if the transaction is committing or finished.
    pub fn abort(&self) -> CoreResult<()> {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        ensure_open(st, self.id)?;
        runner::abort(&self.engine, st, self.id, None);
        Ok(())
    }

    /// Commits once the already queued requests have run, without waiting
    /// for the transaction to go idle.
    ///
    /// # Errors
    ///
    /// Invalid state if the transaction is committing or finished.
    pub fn commit(&self) -> CoreResult<()> {
        let mut guard = self.engine.state();
        let st: &mut EngineState = &mut guard;
        ensure_open(st, self.id)?;
        st.transaction_mut(self.id)?.state = TransactionState::Committing;
        runner::schedule_step(&self.engine, st, self.id);
        Ok(())
    }

    /// Sets the callback run after the transaction commits.
    pub fn on_complete(
        &self,
        handler: impl FnMut(&Transaction) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(record) = self.engine.state().transactions.get_mut(&self.id) {
            record.on_complete = Some(Box::new(handler));
        }
        self
    }

    /// Sets the callback run after the transaction aborts.
    pub fn on_abort(
        &self,
        handler: impl FnMut(&Transaction) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(record) = self.engine.state().transactions.get_mut(&self.id) {
            record.on_abort = Some(Box::new(handler));
        }
        self
    }

    /// Sets the callback that receives request errors after the request's
    /// own error callback.
    pub fn on_error(
        &self,
        handler: impl FnMut(&mut ErrorEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(record) = self.engine.state().transactions.get_mut(&self.id) {
            record.on_error = Some(Box::new(handler));
        }
        self
    }
}

fn ensure_open(st: &EngineState, id: TransactionId) -> CoreResult<()> {
    match st.transactions.get(&id).map(|t| t.state) {
        Some(TransactionState::Active | TransactionState::Inactive) => Ok(()),
        _ => Err(CoreError::invalid_state(
            "transaction is already committing or finished",
        )),
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine) && self.id == other.id
    }
}

impl Eq for Transaction {}
