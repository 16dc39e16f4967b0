//! Opening and deleting databases.
//!
//! Open and delete requests for one database name share a FIFO queue and
//! are processed one at a time. A request that changes the version (an
//! upgrade or a delete) first asks every other open connection to close
//! and waits until they have.

mod queue;

pub(crate) use queue::{connection_closed, enqueue, finish_upgrade};

use crate::connection::{Connection, ConnectionSnapshot};
use crate::engine::{Engine, Retired};
use crate::error::{CallbackResult, CoreError};
use crate::events::{
    FailureHandler, OpenSuccessHandler, UpgradeEvent, UpgradeHandler, VersionChangeEvent,
    VersionChangeHandler,
};
use crate::request::ReadyState;
use crate::transaction::Transaction;
use crate::types::{ConnectionId, RequestId, TransactionId};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleKind {
    /// Open at the given version, or at the current one.
    Open { version: Option<u64> },
    Delete,
}

/// A version change held up by other open connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Waiting {
    pub old_version: u64,
    /// `None` for a delete.
    pub new_version: Option<u64>,
}

impl Waiting {
    pub(crate) fn event(self) -> VersionChangeEvent {
        VersionChangeEvent {
            old_version: self.old_version,
            new_version: self.new_version,
        }
    }
}

/// What an open or delete request handle still reports after the record
/// is dropped.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleSnapshot {
    pub connection: Option<(ConnectionId, Retired<ConnectionSnapshot>)>,
    pub error: Option<CoreError>,
    pub old_version: Option<u64>,
}

/// Engine-side record of an open or delete request.
pub(crate) struct LifecycleRecord {
    pub database: String,
    pub kind: LifecycleKind,
    pub ready: ReadyState,
    pub connection: Option<ConnectionId>,
    /// The connection's slot, kept even after the connection is dropped.
    pub owner: Option<Retired<ConnectionSnapshot>>,
    /// The upgrade transaction while it runs.
    pub transaction: Option<TransactionId>,
    pub error: Option<CoreError>,
    /// Version found when a delete started.
    pub old_version: Option<u64>,
    pub waiting: Option<Waiting>,
    pub on_upgrade_needed: Option<UpgradeHandler>,
    pub on_blocked: Option<VersionChangeHandler>,
    pub on_open_success: Option<OpenSuccessHandler>,
    pub on_delete_success: Option<VersionChangeHandler>,
    pub on_error: Option<FailureHandler>,
    pub retired: Retired<LifecycleSnapshot>,
}

impl LifecycleRecord {
    pub(crate) fn new(database: String, kind: LifecycleKind) -> Self {
        Self {
            database,
            kind,
            ready: ReadyState::Pending,
            connection: None,
            owner: None,
            transaction: None,
            error: None,
            old_version: None,
            waiting: None,
            on_upgrade_needed: None,
            on_blocked: None,
            on_open_success: None,
            on_delete_success: None,
            on_error: None,
            retired: Retired::default(),
        }
    }

    /// The opened connection, once the open has got that far.
    fn connection_handle(&self, engine: &Arc<Engine>) -> Option<Connection> {
        let id = self.connection?;
        let owner = self.owner.as_ref()?;
        Some(Connection::from_parts(Arc::clone(engine), id, Arc::clone(owner)))
    }

    /// Leaves the final state for the handles.
    pub(crate) fn retire(self) {
        let connection = self.connection.zip(self.owner);
        *self.retired.lock() = Some(LifecycleSnapshot {
            connection,
            error: self.error,
            old_version: self.old_version,
        });
    }
}

/// Reads a live record, or the snapshot it left behind.
fn read<R>(
    engine: &Engine,
    id: RequestId,
    retired: &Retired<LifecycleSnapshot>,
    live: impl FnOnce(&LifecycleRecord) -> R,
    settled: impl FnOnce(&LifecycleSnapshot) -> R,
) -> Option<R> {
    let st = engine.state();
    match st.lifecycle.get(&id) {
        Some(record) => Some(live(record)),
        None => retired.lock().as_ref().map(settled),
    }
}

fn update(engine: &Engine, id: RequestId, f: impl FnOnce(&mut LifecycleRecord)) {
    if let Some(record) = engine.state().lifecycle.get_mut(&id) {
        f(record);
    }
}

/// Handle to a pending or finished open request.
#[derive(Clone)]
pub struct OpenRequest {
    engine: Arc<Engine>,
    id: RequestId,
    retired: Retired<LifecycleSnapshot>,
}

impl OpenRequest {
    pub(crate) fn from_parts(
        engine: Arc<Engine>,
        id: RequestId,
        retired: Retired<LifecycleSnapshot>,
    ) -> Self {
        Self {
            engine,
            id,
            retired,
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns `Done` once the connection exists or the request failed.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        read(&self.engine, self.id, &self.retired, |r| r.ready, |_| ReadyState::Done)
            .unwrap_or(ReadyState::Done)
    }

    /// The opened connection. Available from the upgrade callback on.
    #[must_use]
    pub fn result(&self) -> Option<Connection> {
        read(
            &self.engine,
            self.id,
            &self.retired,
            |r| {
                if r.ready == ReadyState::Pending || r.error.is_some() {
                    return None;
                }
                r.connection_handle(&self.engine)
            },
            |r| {
                let (id, owner) = r.connection.as_ref().filter(|_| r.error.is_none())?;
                Some(Connection::from_parts(
                    Arc::clone(&self.engine),
                    *id,
                    Arc::clone(owner),
                ))
            },
        )
        .flatten()
    }

    /// The failure, once the request failed.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        read(
            &self.engine,
            self.id,
            &self.retired,
            |r| r.error.clone(),
            |r| r.error.clone(),
        )
        .flatten()
    }

    /// The upgrade transaction while it runs.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        let st = self.engine.state();
        let tx = st.lifecycle.get(&self.id)?.transaction?;
        Transaction::lookup(&self.engine, &st, tx).ok()
    }

    /// Sets the callback run when the database must be created or
    /// upgraded. Returning `Err` aborts the upgrade.
    pub fn on_upgrade_needed(
        &self,
        handler: impl FnMut(&UpgradeEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_upgrade_needed = Some(Box::new(handler)));
        self
    }

    /// Sets the callback run when other connections stay open after being
    /// asked to close.
    pub fn on_blocked(
        &self,
        handler: impl FnMut(&VersionChangeEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_blocked = Some(Box::new(handler)));
        self
    }

    /// Sets the callback run with the new connection.
    pub fn on_success(
        &self,
        handler: impl FnMut(&Connection) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_open_success = Some(Box::new(handler)));
        self
    }

    /// Sets the callback run if the open fails.
    pub fn on_error(
        &self,
        handler: impl FnMut(&CoreError) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_error = Some(Box::new(handler)));
        self
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest").field("id", &self.id).finish()
    }
}

/// Handle to a pending or finished delete request.
#[derive(Clone)]
pub struct DeleteRequest {
    engine: Arc<Engine>,
    id: RequestId,
    retired: Retired<LifecycleSnapshot>,
}

impl DeleteRequest {
    pub(crate) fn from_parts(
        engine: Arc<Engine>,
        id: RequestId,
        retired: Retired<LifecycleSnapshot>,
    ) -> Self {
        Self {
            engine,
            id,
            retired,
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns `Done` once the database is gone or the request failed.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        read(&self.engine, self.id, &self.retired, |r| r.ready, |_| ReadyState::Done)
            .unwrap_or(ReadyState::Done)
    }

    /// The version the database had, 0 if it did not exist.
    #[must_use]
    pub fn result(&self) -> Option<u64> {
        read(
            &self.engine,
            self.id,
            &self.retired,
            |r| match (r.ready, &r.error) {
                (ReadyState::Done, None) => r.old_version,
                _ => None,
            },
            |r| r.old_version.filter(|_| r.error.is_none()),
        )
        .flatten()
    }

    /// The failure, once the request failed.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        read(
            &self.engine,
            self.id,
            &self.retired,
            |r| r.error.clone(),
            |r| r.error.clone(),
        )
        .flatten()
    }

    /// Sets the callback run once the database is deleted.
    pub fn on_success(
        &self,
        handler: impl FnMut(&VersionChangeEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_delete_success = Some(Box::new(handler)));
        self
    }

    /// Sets the callback run when other connections stay open after being
    /// asked to close.
    pub fn on_blocked(
        &self,
        handler: impl FnMut(&VersionChangeEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_blocked = Some(Box::new(handler)));
        self
    }

    /// Sets the callback run if the delete fails.
    pub fn on_error(
        &self,
        handler: impl FnMut(&CoreError) -> CallbackResult + Send + 'static,
    ) -> &Self {
        update(&self.engine, self.id, |r| r.on_error = Some(Box::new(handler)));
        self
    }
}

impl fmt::Debug for DeleteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteRequest").field("id", &self.id).finish()
    }
}
