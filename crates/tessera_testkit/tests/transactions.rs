//! Transaction activity, scheduling, commit and abort.

use tessera_codec::{Key, Value};
use tessera_core::{
    CoreError, ErrorKind, StoreParams, TransactionMode, TransactionState,
};
use tessera_testkit::prelude::*;

fn simple_store(factory: &TestFactory, name: &str) -> tessera_core::Connection {
    factory.open_with_upgrade(name, 1, |event| {
        event
            .connection
            .create_object_store("s", StoreParams::new())?;
        Ok(())
    })
}

#[test]
fn transaction_is_active_only_in_callbacks() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "active");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap();
    let store = tx.object_store("s").unwrap();
    let log = EventLog::new();

    let first = store.get(0).unwrap();
    let (inner, sink, loop_handle) = (store.clone(), log.clone(), factory.clone());
    first.on_success(move |_| {
        match inner.get(0) {
            Ok(_) => sink.push("second ok"),
            Err(err) => sink.push(format!("second {}", err.name())),
        }
        let (later, sink) = (inner.clone(), sink.clone());
        loop_handle.queue_task(move || match later.get(0) {
            Ok(_) => sink.push("third ok"),
            Err(err) => sink.push(format!("third {}", err.name())),
        });
        Ok(())
    });
    factory.run();

    assert_eq!(
        log.entries(),
        vec!["second ok", "third TransactionInactiveError"]
    );
    assert_eq!(tx.state(), TransactionState::Finished);
}

#[test]
fn transaction_goes_inactive_after_creating_task() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "inactive");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Active);

    let store = tx.object_store("s").unwrap();
    let seen = Captured::new();
    let (sink, handle) = (seen.clone(), tx.clone());
    factory.queue_microtask(move || {
        let put = store.put(&Value::from(1), Some(Key::from(1)));
        sink.set((handle.state(), put.err()));
    });
    factory.run();

    assert_eq!(
        seen.get(),
        Some((
            TransactionState::Inactive,
            Some(CoreError::TransactionInactive)
        ))
    );
}

#[test]
fn unique_index_rejects_duplicate_email() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("unique", 1, create_people);
    let tx = connection
        .transaction(&[PEOPLE], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store(PEOPLE).unwrap();
    store.add(&person(1, "Ann", "same@example.com"), None).unwrap();
    let second = store.add(&person(2, "Bob", "same@example.com"), None).unwrap();

    let failure = Captured::new();
    let sink = failure.clone();
    second.on_error(move |event| {
        sink.set(event.error().kind());
        event.prevent_default();
        Ok(())
    });
    let completed = Captured::new();
    let done = completed.clone();
    tx.on_complete(move |_| {
        done.set(true);
        Ok(())
    });
    factory.run();

    assert_eq!(failure.get(), Some(ErrorKind::Constraint));
    assert_eq!(completed.get(), Some(true));
    assert_eq!(read_all(&factory, &connection, PEOPLE).len(), 1);
}

#[test]
fn unhandled_request_error_aborts() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("unhandled", 1, create_people);
    let tx = connection
        .transaction(&[PEOPLE], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store(PEOPLE).unwrap();
    store.add(&person(1, "Ann", "a@example.com"), None).unwrap();
    store.add(&person(1, "Ann", "b@example.com"), None).unwrap();

    let log = EventLog::new();
    let sink = log.clone();
    tx.on_error(move |event| {
        sink.push(format!("tx error {}", event.error().name()));
        Ok(())
    });
    let sink = log.clone();
    tx.on_abort(move |_| {
        sink.push("abort");
        Ok(())
    });
    factory.run();

    assert_eq!(log.entries(), vec!["tx error ConstraintError", "abort"]);
    assert_eq!(tx.error().map(|e| e.kind()), Some(ErrorKind::Constraint));
    assert!(read_all(&factory, &connection, PEOPLE).is_empty());
}

#[test]
fn stopped_propagation_skips_transaction_handler() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("propagation", 1, create_people);
    let tx = connection
        .transaction(&[PEOPLE], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store(PEOPLE).unwrap();
    store.add(&person(1, "Ann", "a@example.com"), None).unwrap();
    let duplicate = store.add(&person(1, "Ann", "a@example.com"), None).unwrap();

    let log = EventLog::new();
    let sink = log.clone();
    duplicate.on_error(move |event| {
        sink.push("request error");
        event.stop_propagation();
        event.prevent_default();
        Ok(())
    });
    let sink = log.clone();
    tx.on_error(move |_| {
        sink.push("tx error");
        Ok(())
    });
    factory.run();

    assert_eq!(log.entries(), vec!["request error"]);
    assert_eq!(read_all(&factory, &connection, PEOPLE).len(), 1);
}

#[test]
fn failing_success_callback_aborts() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "throws");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let request = tx
        .object_store("s")
        .unwrap()
        .put(&Value::from("x"), Some(Key::from(1)))
        .unwrap();
    request.on_success(|_| Err(CoreError::data("callback failed")));
    factory.run();

    assert_eq!(tx.error().map(|e| e.kind()), Some(ErrorKind::Abort));
    assert!(read_all(&factory, &connection, "s").is_empty());
}

#[test]
fn abort_rolls_back_key_generator() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("generator", 1, |event| {
        event.connection.create_object_store(
            "s",
            StoreParams::new().key_path("id").auto_increment(true),
        )?;
        Ok(())
    });

    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let first = Captured::new();
    let sink = first.clone();
    let handle = tx.clone();
    tx.object_store("s")
        .unwrap()
        .put(&Value::object([("n", Value::from(1))]), None)
        .unwrap()
        .on_success(move |event| {
            sink.set(event.result().as_key().cloned());
            handle.abort()?;
            Ok(())
        });
    factory.run();
    assert_eq!(first.get(), Some(Some(Key::from(1))));
    assert_eq!(tx.state(), TransactionState::Finished);

    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    tx.object_store("s")
        .unwrap()
        .put(&Value::object([("n", Value::from(2))]), None)
        .unwrap();
    factory.run();

    let records = read_all(&factory, &connection, "s");
    assert_eq!(records.len(), 1);
    let Value::Object(record) = &records[0] else {
        panic!("record is not an object");
    };
    assert_eq!(record.get("id"), Some(Value::from(1)));
}

#[test]
fn conflicting_transactions_run_in_order() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "ordered");
    let log = EventLog::new();

    let writer = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let reader = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    assert!(writer.is_started());
    assert!(!reader.is_started());

    let sink = log.clone();
    writer
        .object_store("s")
        .unwrap()
        .put(&Value::from("hello"), Some(Key::from(1)))
        .unwrap()
        .on_success(move |_| {
            sink.push("write");
            Ok(())
        });
    let sink = log.clone();
    writer.on_complete(move |_| {
        sink.push("writer complete");
        Ok(())
    });
    let sink = log.clone();
    reader
        .object_store("s")
        .unwrap()
        .get(1)
        .unwrap()
        .on_success(move |event| {
            let seen = event.result().as_value().cloned();
            sink.push(format!("read {}", seen.is_some_and(|v| v == Value::from("hello"))));
            Ok(())
        });
    factory.run();

    assert_eq!(
        log.entries(),
        vec!["write", "writer complete", "read true"]
    );
}

#[test]
fn read_only_transactions_share_scope() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "shared");
    let a = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap();
    let b = connection
        .transaction(&["s"], TransactionMode::ReadOnly)
        .unwrap();
    assert!(a.is_started());
    assert!(b.is_started());
    factory.run();
    assert_eq!(a.state(), TransactionState::Finished);
    assert_eq!(b.state(), TransactionState::Finished);
}

#[test]
fn commit_and_abort_after_finish_fail() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "finished");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committing);
    assert_eq!(tx.commit().unwrap_err().kind(), ErrorKind::InvalidState);
    factory.run();

    assert_eq!(tx.state(), TransactionState::Finished);
    assert_eq!(tx.abort().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        tx.object_store("s").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
}

#[test]
fn explicit_commit_still_runs_queued_callbacks() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "commit");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let log = EventLog::new();
    let sink = log.clone();
    tx.object_store("s")
        .unwrap()
        .put(&Value::from(1), Some(Key::from(1)))
        .unwrap()
        .on_success(move |_| {
            sink.push("put");
            Err(CoreError::data("ignored while committing"))
        });
    let sink = log.clone();
    tx.on_complete(move |_| {
        sink.push("complete");
        Ok(())
    });
    tx.commit().unwrap();
    factory.run();

    assert_eq!(log.entries(), vec!["put", "complete"]);
    assert_eq!(read_all(&factory, &connection, "s").len(), 1);
}

#[test]
fn scope_and_mode_are_checked() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("checks", 1, |event| {
        event
            .connection
            .create_object_store("s", StoreParams::new().key_path("id"))?;
        event
            .connection
            .create_object_store("t", StoreParams::new())?;
        Ok(())
    });

    assert_eq!(
        connection
            .transaction(&["missing"], TransactionMode::ReadOnly)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        connection
            .transaction(&[], TransactionMode::ReadOnly)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidAccess
    );
    // The mode is rejected before the scope is looked at.
    for scope in [&[][..], &["missing"][..]] {
        assert_eq!(
            connection
                .transaction(scope, TransactionMode::VersionChange)
                .unwrap_err()
                .kind(),
            ErrorKind::Type
        );
    }

    let tx = connection
        .transaction(&["s", "s"], TransactionMode::ReadOnly)
        .unwrap();
    assert_eq!(tx.object_store_names(), vec!["s"]);
    assert_eq!(tx.object_store("t").unwrap_err().kind(), ErrorKind::NotFound);

    let store = tx.object_store("s").unwrap();
    let record = Value::object([("id", Value::from(1))]);
    assert_eq!(store.put(&record, None).unwrap_err(), CoreError::ReadOnly);
    factory.run();
    // Inactive is reported before read-only.
    assert_eq!(
        store.put(&record, None).unwrap_err(),
        CoreError::TransactionInactive
    );

    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let store = tx.object_store("s").unwrap();
    let keyless = Value::object([("name", Value::from("no id"))]);
    assert_eq!(store.put(&keyless, None).unwrap_err().kind(), ErrorKind::Data);
    assert_eq!(
        store.put(&record, Some(Key::from(1))).unwrap_err().kind(),
        ErrorKind::Data
    );
}

#[test]
fn reads_return_independent_copies() {
    let factory = TestFactory::new();
    let connection = simple_store(&factory, "copies");
    let tx = connection
        .transaction(&["s"], TransactionMode::ReadWrite)
        .unwrap();
    let original = Value::object([("n", Value::from(1))]);
    tx.object_store("s")
        .unwrap()
        .put(&original, Some(Key::from(1)))
        .unwrap();
    if let Value::Object(object) = &original {
        object.set("n", Value::from(2));
    }
    factory.run();

    let records = read_all(&factory, &connection, "s");
    let Value::Object(stored) = &records[0] else {
        panic!("record is not an object");
    };
    assert_eq!(stored.get("n"), Some(Value::from(1)));
}
