//! The per-database request queue and the version change protocol.

use super::{LifecycleKind, LifecycleRecord, LifecycleSnapshot, Waiting};
use crate::connection::{self, Connection, ConnectionRecord};
use crate::engine::{Engine, EngineState, Retired};
use crate::error::CoreError;
use crate::events::{UpgradeEvent, VersionChangeEvent};
use crate::request::ReadyState;
use crate::transaction::{runner, Transaction, UpgradeInfo};
use crate::types::{ConnectionId, RequestId, TransactionMode};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queues an open or delete request behind earlier ones for `name`.
pub(crate) fn enqueue(
    engine: &Arc<Engine>,
    st: &mut EngineState,
    name: &str,
    kind: LifecycleKind,
) -> (RequestId, Retired<LifecycleSnapshot>) {
    let id = RequestId::new(st.allocate());
    let record = LifecycleRecord::new(name.to_string(), kind);
    let retired = Arc::clone(&record.retired);
    st.lifecycle.insert(id, record);
    st.database_mut(name).queue.push_back(id);
    debug!(database = name, request = %id, ?kind, "lifecycle request queued");
    let database = name.to_string();
    engine.queue_task(move |engine| pump(engine, &database));
    (id, retired)
}

/// Starts the next queued request unless one is already running.
fn pump(engine: &Arc<Engine>, database: &str) {
    let next = {
        let mut guard = engine.state();
        let st = &mut *guard;
        let db = st.database_mut(database);
        if db.active.is_some() {
            return;
        }
        let Some(next) = db.queue.pop_front() else {
            return;
        };
        db.active = Some(next);
        st.lifecycle.get(&next).map(|r| (next, r.kind))
    };
    match next {
        Some((id, LifecycleKind::Open { version })) => begin_open(engine, id, version),
        Some((id, LifecycleKind::Delete)) => begin_delete(engine, id),
        None => {}
    }
}

fn begin_open(engine: &Arc<Engine>, id: RequestId, version: Option<u64>) {
    let mut guard = engine.state();
    let st = &mut *guard;
    let Some(database) = st.lifecycle.get(&id).map(|r| r.database.clone()) else {
        return;
    };
    let current = st.database_mut(&database).version;
    let requested = match version {
        Some(version) => version,
        None if current == 0 => engine.config.default_open_version.max(1),
        None => current,
    };
    if requested < current {
        drop(guard);
        fail(engine, id, CoreError::Version { requested, current });
        return;
    }

    let connection = ConnectionId::new(st.allocate());
    let store_names = st.database_mut(&database).store_names();
    let record = ConnectionRecord::new(database.clone(), current, store_names);
    let owner = Arc::clone(&record.retired);
    st.connections.insert(connection, record);
    debug!(%database, %connection, requested, current, "opening database");
    let upgrade = requested > current;
    if let Some(record) = st.lifecycle.get_mut(&id) {
        record.connection = Some(connection);
        record.owner = Some(owner);
        if upgrade {
            record.waiting = Some(Waiting {
                old_version: current,
                new_version: Some(requested),
            });
        }
    }
    drop(guard);
    if upgrade {
        notify_and_wait(engine, id);
    } else {
        succeed_open(engine, id);
    }
}

fn begin_delete(engine: &Arc<Engine>, id: RequestId) {
    let version = {
        let mut guard = engine.state();
        let st = &mut *guard;
        let Some(database) = st.lifecycle.get(&id).map(|r| r.database.clone()) else {
            return;
        };
        let version = st.database_mut(&database).version;
        if let Some(record) = st.lifecycle.get_mut(&id) {
            record.old_version = Some(version);
            if version > 0 {
                record.waiting = Some(Waiting {
                    old_version: version,
                    new_version: None,
                });
            }
        }
        version
    };
    if version > 0 {
        notify_and_wait(engine, id);
    } else {
        complete_delete(engine, id, 0);
    }
}

/// Connections to `database` other than `own` that are not closed.
fn open_connections<'a>(
    st: &'a EngineState,
    database: &'a str,
    own: Option<ConnectionId>,
) -> impl Iterator<Item = (ConnectionId, &'a ConnectionRecord)> + 'a {
    st.connections
        .iter()
        .filter(move |(id, c)| Some(**id) != own && c.database == database && !c.closed)
        .map(|(id, c)| (*id, c))
}

/// Asks other connections to close, then proceeds or reports blocked.
fn notify_and_wait(engine: &Arc<Engine>, id: RequestId) {
    let (event, database, own, targets) = {
        let st = engine.state();
        let Some(record) = st.lifecycle.get(&id) else {
            return;
        };
        let Some(waiting) = record.waiting else {
            return;
        };
        let targets: Vec<ConnectionId> =
            open_connections(&st, &record.database, record.connection)
                .filter(|(_, c)| !c.close_pending)
                .map(|(id, _)| id)
                .collect();
        (
            waiting.event(),
            record.database.clone(),
            record.connection,
            targets,
        )
    };

    for connection in targets {
        let thrown = engine
            .invoke(
                |st| {
                    st.connections
                        .get_mut(&connection)
                        .filter(|c| !c.close_pending)
                        .map(|c| &mut c.on_version_change)
                },
                |handler| handler(&event),
            )
            .and_then(Result::err);
        if let Some(err) = thrown {
            warn!(%connection, error = %err, "version change callback failed");
        }
    }

    let blocked = open_connections(&engine.state(), &database, own).count();
    if blocked == 0 {
        proceed(engine, id);
        return;
    }
    debug!(%database, request = %id, blocked, "version change blocked");
    let thrown = engine
        .invoke(
            |st| st.lifecycle.get_mut(&id).map(|r| &mut r.on_blocked),
            |handler| handler(&event),
        )
        .and_then(Result::err);
    if let Some(err) = thrown {
        warn!(request = %id, error = %err, "blocked callback failed");
    }
}

/// Called when a connection to `database` finishes closing.
pub(crate) fn connection_closed(engine: &Arc<Engine>, st: &mut EngineState, database: &str) {
    let Some(active) = st.databases.get(database).and_then(|db| db.active) else {
        return;
    };
    if st.lifecycle.get(&active).is_some_and(|r| r.waiting.is_some()) {
        engine.queue_task(move |engine| resume(engine, active));
    }
}

fn resume(engine: &Arc<Engine>, id: RequestId) {
    let unblocked = {
        let st = engine.state();
        st.lifecycle.get(&id).is_some_and(|r| {
            r.waiting.is_some() && open_connections(&st, &r.database, r.connection).next().is_none()
        })
    };
    if unblocked {
        proceed(engine, id);
    }
}

fn proceed(engine: &Arc<Engine>, id: RequestId) {
    let waiting = engine
        .state()
        .lifecycle
        .get_mut(&id)
        .and_then(|r| r.waiting.take());
    match waiting {
        Some(Waiting {
            old_version,
            new_version: Some(new_version),
        }) => run_upgrade(engine, id, old_version, new_version),
        Some(Waiting {
            old_version,
            new_version: None,
        }) => run_delete(engine, id, old_version),
        None => {}
    }
}

fn run_upgrade(engine: &Arc<Engine>, id: RequestId, old_version: u64, new_version: u64) {
    let (connection, transaction) = {
        let mut guard = engine.state();
        let st = &mut *guard;
        let Some((database, Some(connection))) = st
            .lifecycle
            .get(&id)
            .map(|r| (r.database.clone(), r.connection))
        else {
            return;
        };
        if let Some(record) = st.connections.get_mut(&connection) {
            record.version = new_version;
        }
        let tx = runner::create(
            engine,
            st,
            connection,
            &database,
            TransactionMode::VersionChange,
            Vec::new(),
        );
        if let Some(record) = st.transactions.get_mut(&tx) {
            record.upgrade = Some(UpgradeInfo {
                old_version,
                new_version,
                request: id,
            });
        }
        if let Some(record) = st.lifecycle.get_mut(&id) {
            record.transaction = Some(tx);
            record.ready = ReadyState::Done;
        }
        info!(%database, old_version, new_version, "upgrading database");
        let Some(connection) = Connection::lookup(engine, st, connection) else {
            return;
        };
        let Ok(transaction) = Transaction::lookup(engine, st, tx) else {
            return;
        };
        (connection, transaction)
    };

    let tx = transaction.id();
    let event = UpgradeEvent {
        connection,
        transaction,
        old_version,
        new_version,
    };
    let thrown = engine
        .invoke(
            |st| st.lifecycle.get_mut(&id).map(|r| &mut r.on_upgrade_needed),
            |handler| handler(&event),
        )
        .and_then(Result::err);
    if let Some(err) = thrown {
        warn!(request = %id, error = %err, "upgrade callback failed");
        runner::abort(
            engine,
            &mut engine.state(),
            tx,
            Some(CoreError::abort(format!("upgrade callback failed: {err}"))),
        );
    }
    engine.events.perform_microtask_checkpoint();
}

/// Settles an open request once its upgrade transaction has finished.
pub(crate) fn finish_upgrade(engine: &Arc<Engine>, id: RequestId, aborted: bool) {
    let outcome = {
        let mut guard = engine.state();
        let st = &mut *guard;
        let Some(record) = st.lifecycle.get_mut(&id) else {
            return;
        };
        record.transaction = None;
        let connection = record.connection;
        let target = connection.and_then(|c| st.connections.get_mut(&c));
        match target {
            Some(record) if aborted => {
                record.close_pending = true;
                record.closed = true;
                record.on_version_change = None;
                if let Some(connection) = connection {
                    connection::retire(st, connection);
                }
                Err(CoreError::abort("upgrade transaction was aborted"))
            }
            None if aborted => Err(CoreError::abort("upgrade transaction was aborted")),
            Some(record) if !record.close_pending => Ok(()),
            _ => Err(CoreError::abort(
                "connection was closed before the upgrade finished",
            )),
        }
    };
    match outcome {
        Ok(()) => succeed_open(engine, id),
        Err(err) => fail(engine, id, err),
    }
}

fn run_delete(engine: &Arc<Engine>, id: RequestId, old_version: u64) {
    {
        let mut guard = engine.state();
        let st = &mut *guard;
        let Some(database) = st.lifecycle.get(&id).map(|r| r.database.clone()) else {
            return;
        };
        let db = st.database_mut(&database);
        db.stores.clear();
        db.version = 0;
        st.stores.retain(|_, s| s.database != database);
        let stores = &st.stores;
        st.indexes.retain(|_, i| stores.contains_key(&i.store));
        info!(%database, old_version, "database deleted");
    }
    complete_delete(engine, id, old_version);
}

fn complete_delete(engine: &Arc<Engine>, id: RequestId, old_version: u64) {
    if let Some(record) = engine.state().lifecycle.get_mut(&id) {
        record.ready = ReadyState::Done;
        record.old_version = Some(old_version);
    }
    let event = VersionChangeEvent {
        old_version,
        new_version: None,
    };
    let thrown = engine
        .invoke(
            |st| st.lifecycle.get_mut(&id).map(|r| &mut r.on_delete_success),
            |handler| handler(&event),
        )
        .and_then(Result::err);
    if let Some(err) = thrown {
        warn!(request = %id, error = %err, "delete callback failed");
    }
    finish_request(engine, id);
}

fn succeed_open(engine: &Arc<Engine>, id: RequestId) {
    let handle = {
        let mut st = engine.state();
        let Some(record) = st.lifecycle.get_mut(&id) else {
            return;
        };
        record.ready = ReadyState::Done;
        record.connection_handle(engine)
    };
    if let Some(handle) = handle {
        debug!(request = %id, connection = %handle.id(), "database opened");
        let thrown = engine
            .invoke(
                |st| st.lifecycle.get_mut(&id).map(|r| &mut r.on_open_success),
                |handler| handler(&handle),
            )
            .and_then(Result::err);
        if let Some(err) = thrown {
            warn!(request = %id, error = %err, "open callback failed");
        }
    }
    finish_request(engine, id);
}

fn fail(engine: &Arc<Engine>, id: RequestId, error: CoreError) {
    {
        let mut st = engine.state();
        let Some(record) = st.lifecycle.get_mut(&id) else {
            return;
        };
        debug!(database = %record.database, request = %id, %error, "lifecycle request failed");
        record.ready = ReadyState::Done;
        record.error = Some(error.clone());
    }
    let thrown = engine
        .invoke(
            |st| st.lifecycle.get_mut(&id).map(|r| &mut r.on_error),
            |handler| handler(&error),
        )
        .and_then(Result::err);
    if let Some(err) = thrown {
        warn!(request = %id, error = %err, "error callback failed");
    }
    finish_request(engine, id);
}

/// Drops the request with its callbacks and lets the next queued request
/// run.
fn finish_request(engine: &Arc<Engine>, id: RequestId) {
    let database = {
        let mut guard = engine.state();
        let st = &mut *guard;
        let Some(record) = st.lifecycle.remove(&id) else {
            return;
        };
        let database = record.database.clone();
        record.retire();
        let db = st.database_mut(&database);
        if db.active == Some(id) {
            db.active = None;
        }
        database
    };
    engine.queue_task(move |engine| pump(engine, &database));
}
