//! Driving transactions through their lifecycle.
//!
//! A started transaction advances one request per task. Each step runs the
//! next queued operation under the lock, then delivers its outcome to the
//! user with the transaction active. Once the queue drains while the
//! transaction is inactive or committing, it commits.

use super::scheduler::{self, Claim};
use super::state::TransactionState;
use super::Transaction;
use crate::connection;
use crate::engine::{Engine, EngineState};
use crate::error::CoreError;
use crate::events::{ErrorEvent, SuccessEvent};
use crate::lifecycle;
use crate::request::{ReadyState, Request, RequestSource};
use crate::transaction::TransactionRecord;
use crate::types::{ConnectionId, RequestId, TransactionId, TransactionMode};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Creates a transaction and lets it start if nothing blocks it.
///
/// The transaction is active until the current task's microtasks drain.
pub(crate) fn create(
    engine: &Arc<Engine>,
    st: &mut EngineState,
    connection: ConnectionId,
    database: &str,
    mode: TransactionMode,
    scope: Vec<String>,
) -> TransactionId {
    let id = TransactionId::new(st.allocate());
    debug!(transaction = %id, %mode, ?scope, "transaction created");
    let mut record = TransactionRecord::new(connection, database.to_string(), mode, scope);
    if let Some(owner) = st.connections.get(&connection) {
        record.owner = Arc::clone(&owner.retired);
    }
    st.transactions.insert(id, record);
    engine.queue_microtask(move |engine| deactivate(engine, id));
    try_start(engine, st, database);
    id
}

fn deactivate(engine: &Arc<Engine>, tx: TransactionId) {
    let mut guard = engine.state();
    let st = &mut *guard;
    if let Some(record) = st.transactions.get_mut(&tx) {
        if record.state == TransactionState::Active {
            record.state = TransactionState::Inactive;
        }
    }
    schedule_step(engine, st, tx);
}

/// Starts every transaction of `database` that no longer waits on an
/// earlier conflicting one.
pub(crate) fn try_start(engine: &Arc<Engine>, st: &mut EngineState, database: &str) {
    let ready = {
        let claims: Vec<Claim<'_>> = st
            .transactions
            .iter()
            .filter(|(_, t)| t.database == database && !t.is_finished())
            .map(|(id, t)| Claim {
                id: *id,
                mode: t.mode,
                scope: &t.scope,
                started: t.started,
            })
            .collect();
        scheduler::startable(&claims)
    };
    for id in ready {
        if let Some(record) = st.transactions.get_mut(&id) {
            record.started = true;
            debug!(transaction = %id, "transaction started");
        }
        schedule_step(engine, st, id);
    }
}

/// Queues a step unless one is queued or the transaction cannot advance.
pub(crate) fn schedule_step(engine: &Arc<Engine>, st: &mut EngineState, tx: TransactionId) {
    let Some(record) = st.transactions.get_mut(&tx) else {
        return;
    };
    if !record.started
        || record.step_scheduled
        || matches!(
            record.state,
            TransactionState::Active | TransactionState::Finished
        )
    {
        return;
    }
    record.step_scheduled = true;
    engine.queue_task(move |engine| step(engine, tx));
}

fn step(engine: &Arc<Engine>, tx: TransactionId) {
    let mut guard = engine.state();
    let st = &mut *guard;
    let Some(record) = st.transactions.get_mut(&tx) else {
        return;
    };
    record.step_scheduled = false;
    if !record.started
        || matches!(
            record.state,
            TransactionState::Active | TransactionState::Finished
        )
    {
        return;
    }
    let next = loop {
        match record.queue.pop_front() {
            Some(id)
                if st
                    .requests
                    .get(&id)
                    .is_some_and(|r| r.ready == ReadyState::Pending) =>
            {
                break Some(id)
            }
            Some(_) => continue,
            None => break None,
        }
    };
    match next {
        Some(request) => run_request(engine, guard, tx, request),
        None => commit(engine, guard, tx),
    }
}

fn run_request(
    engine: &Arc<Engine>,
    mut guard: MutexGuard<'_, EngineState>,
    tx: TransactionId,
    request: RequestId,
) {
    let st = &mut *guard;
    let operation = st
        .requests
        .get_mut(&request)
        .and_then(|r| r.operation.take());
    let outcome = match operation {
        Some(operation) => operation.execute(st, tx),
        None => Err(CoreError::invalid_state("request has nothing to run")),
    };
    if engine.config.log_requests {
        trace!(transaction = %tx, %request, ok = outcome.is_ok(), "request executed");
    }

    let internal = st.requests.get(&request).is_some_and(|r| r.internal);
    if let Some(record) = st.requests.get_mut(&request) {
        record.complete(outcome.clone());
    }
    if internal {
        match outcome {
            Ok(_) => schedule_step(engine, st, tx),
            Err(err) => abort(engine, st, tx, Some(err)),
        }
        return;
    }

    if let Some(record) = st.transactions.get_mut(&tx) {
        if record.state == TransactionState::Inactive {
            record.state = TransactionState::Active;
        }
    }
    let Ok(handle) = Request::lookup(engine, st, request) else {
        return;
    };
    drop(guard);

    let (thrown, failure) = match outcome {
        Ok(outcome) => {
            let result = outcome.into_result(&handle);
            let event = SuccessEvent::new(handle, result);
            let thrown = engine
                .invoke(
                    |st| st.requests.get_mut(&request).map(|r| &mut r.on_success),
                    |handler| handler(&event),
                )
                .and_then(Result::err);
            (thrown, None)
        }
        Err(err) => {
            let (thrown, prevented) = dispatch_error(engine, tx, &handle, err.clone());
            (thrown, (!prevented).then_some(err))
        }
    };
    engine.events.perform_microtask_checkpoint();

    let mut guard = engine.state();
    let st = &mut *guard;
    let Some(record) = st.transactions.get_mut(&tx) else {
        return;
    };
    if record.is_finished() {
        return;
    }
    let committing = record.state == TransactionState::Committing;
    if let Some(err) = thrown.filter(|_| !committing) {
        warn!(transaction = %tx, %request, error = %err, "request callback failed");
        abort(
            engine,
            st,
            tx,
            Some(CoreError::abort(format!("request callback failed: {err}"))),
        );
    } else if let Some(err) = failure {
        abort(engine, st, tx, Some(err));
    } else {
        if record.state == TransactionState::Active {
            record.state = TransactionState::Inactive;
        }
        schedule_step(engine, st, tx);
    }
}

/// Delivers an error to a request and then to its transaction.
///
/// Returns the first error a callback returned, and whether the default
/// action was prevented.
fn dispatch_error(
    engine: &Arc<Engine>,
    tx: TransactionId,
    request: &Request,
    error: CoreError,
) -> (Option<CoreError>, bool) {
    let id = request.id();
    let mut event = ErrorEvent::new(request.clone(), error);
    let mut thrown = engine
        .invoke(
            |st| st.requests.get_mut(&id).map(|r| &mut r.on_error),
            |handler| handler(&mut event),
        )
        .and_then(Result::err);
    if !event.propagation_stopped() {
        let bubbled = engine
            .invoke(
                |st| st.transactions.get_mut(&tx).map(|t| &mut t.on_error),
                |handler| handler(&mut event),
            )
            .and_then(Result::err);
        thrown = thrown.or(bubbled);
    }
    (thrown, event.default_prevented())
}

/// Aborts a transaction.
///
/// Changes are reverted at once. Queued requests fail with an abort
/// error, and the abort event follows on a later task.
pub(crate) fn abort(
    engine: &Arc<Engine>,
    st: &mut EngineState,
    tx: TransactionId,
    error: Option<CoreError>,
) {
    let Some(record) = st.transactions.get_mut(&tx) else {
        return;
    };
    if record.is_finished() {
        return;
    }
    match &error {
        Some(err) => debug!(transaction = %tx, error = %err, "transaction aborting"),
        None => debug!(transaction = %tx, "transaction aborting"),
    }
    record.state = TransactionState::Finished;
    record.error = error;
    let undo = std::mem::take(&mut record.undo);
    let pending: Vec<RequestId> = record.queue.drain(..).collect();
    let upgrade = record.upgrade;
    let connection = record.connection;

    for entry in undo.into_iter().rev() {
        st.revert(entry);
    }
    let mut notify = Vec::new();
    for id in pending {
        if let Some(request) = st.requests.get_mut(&id) {
            if request.ready == ReadyState::Pending {
                request.complete(Err(CoreError::abort("transaction was aborted")));
                if !request.internal {
                    notify.push(id);
                }
            }
        }
    }
    let notify: Vec<Request> = notify
        .into_iter()
        .filter_map(|id| Request::lookup(engine, st, id).ok())
        .collect();
    let handle = Transaction::lookup(engine, st, tx).ok();
    if let Some(upgrade) = upgrade {
        if let Some(conn) = st.connections.get_mut(&connection) {
            conn.version = upgrade.old_version;
        }
    }

    engine.queue_task(move |engine| {
        for request in &notify {
            dispatch_error(engine, tx, request, CoreError::abort("transaction was aborted"));
        }
        let thrown = handle.and_then(|handle| {
            engine
                .invoke(
                    |st| st.transactions.get_mut(&tx).map(|t| &mut t.on_abort),
                    |handler| handler(&handle),
                )
                .and_then(Result::err)
        });
        if let Some(err) = thrown {
            warn!(transaction = %tx, error = %err, "abort callback failed");
        }
        finish(engine, tx, true);
    });
}

fn commit(engine: &Arc<Engine>, mut guard: MutexGuard<'_, EngineState>, tx: TransactionId) {
    let st = &mut *guard;
    let Some(record) = st.transactions.get_mut(&tx) else {
        return;
    };
    record.state = TransactionState::Finished;
    record.undo.clear();
    let upgrade = record.upgrade;
    let database = record.database.clone();
    let connection = record.connection;
    if let Some(upgrade) = upgrade {
        let db = st.database_mut(&database);
        db.version = upgrade.new_version;
        let names = db.store_names();
        if let Some(conn) = st.connections.get_mut(&connection) {
            conn.store_names = names;
        }
    }
    let Ok(handle) = Transaction::lookup(engine, st, tx) else {
        return;
    };
    drop(guard);
    debug!(transaction = %tx, "transaction committed");

    let thrown = engine
        .invoke(
            |st| st.transactions.get_mut(&tx).map(|t| &mut t.on_complete),
            |handler| handler(&handle),
        )
        .and_then(Result::err);
    if let Some(err) = thrown {
        warn!(transaction = %tx, error = %err, "complete callback failed");
    }
    finish(engine, tx, false);
}

/// Drops a finished transaction with its requests and cursors, then
/// lets waiting work proceed.
///
/// Handles keep what they still report through their retired slots.
fn finish(engine: &Arc<Engine>, tx: TransactionId, aborted: bool) {
    let mut guard = engine.state();
    let st = &mut *guard;
    let Some(mut record) = st.transactions.remove(&tx) else {
        return;
    };
    let issued = std::mem::take(&mut record.issued);
    let connection = record.connection;
    let database = record.database.clone();
    let upgrade = record.upgrade;
    for id in issued {
        let Some(request) = st.requests.remove(&id) else {
            continue;
        };
        if let RequestSource::Cursor(cursor) = request.source {
            if let Some(cursor) = st.cursors.remove(&cursor) {
                cursor.retire();
            }
        }
        request.retire();
    }
    let store_names = match record.mode {
        TransactionMode::VersionChange => st
            .databases
            .get(&database)
            .map(|db| db.store_names())
            .unwrap_or_default(),
        _ => record.scope.clone(),
    };
    record.retire(store_names);
    trace!(transaction = %tx, "transaction dropped");

    connection::close_if_idle(engine, st, connection);
    if let Some(upgrade) = upgrade {
        st.purge_deleted(&database);
        engine.queue_task(move |engine| {
            lifecycle::finish_upgrade(engine, upgrade.request, aborted);
        });
    }
    try_start(engine, st, &database);
}
