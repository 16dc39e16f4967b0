//! The engine.
//!
//! All state lives in one [`EngineState`] behind a mutex, keyed by typed
//! IDs. Public types are thin handles holding an `Arc<Engine>` and an ID.
//!
//! Records are dropped once nothing can reach them through the engine any
//! more: a transaction with its requests and cursors when it finishes, a
//! connection when it closes, an open or delete request when it settles.
//! Each such record shares a [`Retired`] slot with its handles and leaves
//! its final state there on the way out.
//!
//! User callbacks never run with the lock held: a handler is taken out of
//! its slot, called, and put back afterwards unless the callback installed
//! a replacement.

mod mutation;
mod schema;

use crate::config::Config;
use crate::connection::ConnectionRecord;
use crate::cursor::CursorRecord;
use crate::database::DatabaseRecord;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexState;
use crate::lifecycle::LifecycleRecord;
use crate::operation::Operation;
use crate::request::{RequestRecord, RequestSource};
use crate::scheduler::EventLoop;
use crate::store::StoreState;
use crate::transaction::TransactionRecord;
use crate::types::{ConnectionId, CursorId, IndexId, RequestId, StoreId, TransactionId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Final state of a dropped record, shared with the handles that
/// outlive it. Empty while the record is alive.
pub(crate) type Retired<T> = Arc<Mutex<Option<T>>>;

/// Shared engine behind every handle.
pub(crate) struct Engine {
    state: Mutex<EngineState>,
    pub(crate) events: EventLoop,
    pub(crate) config: Config,
}

impl Engine {
    pub(crate) fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EngineState::default()),
            events: EventLoop::new(),
            config,
        })
    }

    /// Locks the engine state.
    pub(crate) fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    /// Queues a task that receives the engine.
    pub(crate) fn queue_task(self: &Arc<Self>, job: impl FnOnce(&Arc<Engine>) + Send + 'static) {
        let engine = Arc::clone(self);
        self.events.queue_task(Box::new(move || job(&engine)));
    }

    /// Queues a microtask that receives the engine.
    pub(crate) fn queue_microtask(
        self: &Arc<Self>,
        job: impl FnOnce(&Arc<Engine>) + Send + 'static,
    ) {
        let engine = Arc::clone(self);
        self.events.queue_microtask(Box::new(move || job(&engine)));
    }

    /// Calls the handler stored in `slot` without holding the lock.
    ///
    /// Returns `None` if the slot is empty or gone.
    pub(crate) fn invoke<H, R>(
        &self,
        slot: impl Fn(&mut EngineState) -> Option<&mut Option<H>>,
        call: impl FnOnce(&mut H) -> R,
    ) -> Option<R> {
        let taken = {
            let mut state = self.state();
            slot(&mut *state).and_then(Option::take)
        };
        let mut handler = taken?;
        let out = call(&mut handler);
        let mut state = self.state();
        if let Some(place) = slot(&mut *state) {
            if place.is_none() {
                *place = Some(handler);
            }
        }
        Some(out)
    }
}

/// Every object the engine knows about.
#[derive(Default)]
pub(crate) struct EngineState {
    next_id: u64,
    pub databases: BTreeMap<String, DatabaseRecord>,
    pub connections: BTreeMap<ConnectionId, ConnectionRecord>,
    pub transactions: BTreeMap<TransactionId, TransactionRecord>,
    pub requests: HashMap<RequestId, RequestRecord>,
    pub cursors: HashMap<CursorId, CursorRecord>,
    pub stores: HashMap<StoreId, StoreState>,
    pub indexes: HashMap<IndexId, IndexState>,
    pub lifecycle: HashMap<RequestId, LifecycleRecord>,
}

impl EngineState {
    /// Allocates a raw ID, unique across every kind of object.
    pub(crate) fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn transaction(&self, id: TransactionId) -> CoreResult<&TransactionRecord> {
        self.transactions
            .get(&id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown transaction {id}")))
    }

    pub(crate) fn transaction_mut(
        &mut self,
        id: TransactionId,
    ) -> CoreResult<&mut TransactionRecord> {
        self.transactions
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown transaction {id}")))
    }

    /// Looks up a transaction that may issue requests.
    ///
    /// A dropped transaction has finished, so it is inactive as well.
    pub(crate) fn active_transaction(&self, id: TransactionId) -> CoreResult<&TransactionRecord> {
        let record = self
            .transactions
            .get(&id)
            .ok_or(CoreError::TransactionInactive)?;
        record.ensure_active()?;
        Ok(record)
    }

    pub(crate) fn store(&self, id: StoreId) -> CoreResult<&StoreState> {
        self.stores
            .get(&id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown store {id}")))
    }

    /// Looks up a store that has not been deleted.
    pub(crate) fn live_store(&self, id: StoreId) -> CoreResult<&StoreState> {
        let store = self.store(id)?;
        if store.deleted {
            return Err(CoreError::invalid_state(format!(
                "object store {} has been deleted",
                store.name
            )));
        }
        Ok(store)
    }

    pub(crate) fn index(&self, id: IndexId) -> CoreResult<&IndexState> {
        self.indexes
            .get(&id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown index {id}")))
    }

    /// Looks up an index that, along with its store, has not been deleted.
    pub(crate) fn live_index(&self, id: IndexId) -> CoreResult<&IndexState> {
        let index = self.index(id)?;
        self.live_store(index.store)?;
        if index.deleted {
            return Err(CoreError::invalid_state(format!(
                "index {} has been deleted",
                index.name
            )));
        }
        Ok(index)
    }

    /// Returns the record for `name`, creating an empty one if needed.
    pub(crate) fn database_mut(&mut self, name: &str) -> &mut DatabaseRecord {
        self.databases.entry(name.to_string()).or_default()
    }

    /// Returns true while `connection` owns a transaction that has not
    /// finished.
    pub(crate) fn has_unfinished_transactions(&self, connection: ConnectionId) -> bool {
        self.transactions
            .values()
            .any(|t| t.connection == connection && !t.is_finished())
    }

    /// Queues a request on a transaction.
    pub(crate) fn issue(
        &mut self,
        transaction: TransactionId,
        source: RequestSource,
        operation: Operation,
        internal: bool,
    ) -> CoreResult<RequestId> {
        let id = RequestId::new(self.allocate());
        let record = self.transaction_mut(transaction)?;
        record.queue.push_back(id);
        record.issued.push(id);
        self.requests.insert(
            id,
            RequestRecord::new(transaction, source, operation, internal),
        );
        Ok(id)
    }
}
