//! Open, upgrade and delete behavior across connections.

use tessera_core::{CoreError, DatabaseInfo, ErrorKind, ReadyState, StoreParams};
use tessera_testkit::prelude::*;

#[test]
fn deletes_complete_in_submission_order() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("queue", 1, |_| Ok(()));
    connection.close();

    let log = EventLog::new();
    let first = factory.delete_database("queue");
    let sink = log.clone();
    first.on_success(move |_| {
        sink.push("d1");
        Ok(())
    });
    let second = factory.delete_database("queue");
    let sink = log.clone();
    second.on_success(move |_| {
        sink.push("d2");
        Ok(())
    });
    factory.run();

    assert_eq!(log.entries(), vec!["d1", "d2"]);
    assert_eq!(first.result(), Some(1));
    assert_eq!(second.result(), Some(0));
    assert!(factory.databases().is_empty());
}

#[test]
fn aborted_first_upgrade_leaves_no_database() {
    let factory = TestFactory::new();
    let open = factory.open("fresh", Some(2)).unwrap();
    open.on_upgrade_needed(|event| {
        event
            .connection
            .create_object_store("s", StoreParams::new())?;
        event.transaction.abort()?;
        Ok(())
    });
    let failure = Captured::new();
    let sink = failure.clone();
    open.on_error(move |err| {
        sink.set(err.kind());
        Ok(())
    });
    factory.run();

    assert_eq!(failure.get(), Some(ErrorKind::Abort));
    assert!(open.result().is_none());
    assert_eq!(open.ready_state(), ReadyState::Done);
    assert!(factory.databases().is_empty());

    let reopened = factory.open_with_upgrade("fresh", 1, |event| {
        assert_eq!(event.old_version, 0);
        Ok(())
    });
    assert!(reopened.object_store_names().is_empty());
}

#[test]
fn aborted_upgrade_keeps_previous_version() {
    let factory = TestFactory::new();
    let first = factory.open_with_upgrade("kept", 1, |event| {
        event
            .connection
            .create_object_store("old", StoreParams::new())?;
        Ok(())
    });
    first.close();

    let open = factory.open("kept", Some(3)).unwrap();
    open.on_upgrade_needed(|event| {
        event
            .connection
            .create_object_store("new", StoreParams::new())?;
        Err(CoreError::data("refusing to upgrade"))
    });
    factory.run();

    assert_eq!(open.error().map(|e| e.kind()), Some(ErrorKind::Abort));
    assert_eq!(
        factory.databases(),
        vec![DatabaseInfo {
            name: "kept".to_string(),
            version: 1
        }]
    );
    let current = factory.open_current("kept");
    assert_eq!(current.version(), 1);
    assert_eq!(current.object_store_names(), vec!["old"]);
}

#[test]
fn lower_version_is_rejected() {
    let factory = TestFactory::new();
    factory.open_with_upgrade("v", 3, |_| Ok(()));

    let open = factory.open("v", Some(2)).unwrap();
    factory.run();
    assert_eq!(
        open.error(),
        Some(CoreError::Version {
            requested: 2,
            current: 3
        })
    );
}

#[test]
fn upgrade_waits_for_blocking_connection() {
    let factory = TestFactory::new();
    let old = factory.open_with_upgrade("shared", 1, |_| Ok(()));
    let log = EventLog::new();

    let sink = log.clone();
    old.on_version_change(move |event| {
        sink.push(format!("versionchange {:?}", event.new_version));
        Ok(())
    });

    let open = factory.open("shared", Some(2)).unwrap();
    let sink = log.clone();
    open.on_blocked(move |event| {
        sink.push(format!("blocked {}", event.old_version));
        Ok(())
    });
    let sink = log.clone();
    open.on_upgrade_needed(move |event| {
        sink.push(format!("upgrade {}->{}", event.old_version, event.new_version));
        Ok(())
    });
    let sink = log.clone();
    open.on_success(move |_| {
        sink.push("success");
        Ok(())
    });
    factory.run();

    assert_eq!(log.entries(), vec!["versionchange Some(2)", "blocked 1"]);
    assert_eq!(open.ready_state(), ReadyState::Pending);

    old.close();
    assert!(old.is_closed());
    factory.run();

    assert_eq!(
        log.entries(),
        vec!["versionchange Some(2)", "blocked 1", "upgrade 1->2", "success"]
    );
    assert_eq!(open.result().map(|c| c.version()), Some(2));
}

#[test]
fn closing_on_version_change_avoids_blocked() {
    let factory = TestFactory::new();
    let old = factory.open_with_upgrade("polite", 1, |_| Ok(()));
    let log = EventLog::new();

    let handle = old.clone();
    let sink = log.clone();
    old.on_version_change(move |_| {
        sink.push("versionchange");
        handle.close();
        Ok(())
    });

    let delete = factory.delete_database("polite");
    let sink = log.clone();
    delete.on_blocked(move |_| {
        sink.push("blocked");
        Ok(())
    });
    let sink = log.clone();
    delete.on_success(move |event| {
        sink.push(format!("deleted {}", event.old_version));
        Ok(())
    });
    factory.run();

    assert_eq!(log.entries(), vec!["versionchange", "deleted 1"]);
    assert!(old.is_closed());
    assert!(factory.databases().is_empty());
}

#[test]
fn closing_during_upgrade_fails_the_open() {
    let factory = TestFactory::new();
    let open = factory.open("closing", Some(1)).unwrap();
    open.on_upgrade_needed(|event| {
        event.connection.close();
        Ok(())
    });
    factory.run();

    assert_eq!(open.error().map(|e| e.kind()), Some(ErrorKind::Abort));
    assert_eq!(factory.databases().len(), 1);
}

#[test]
fn transactions_are_refused_during_upgrade() {
    let factory = TestFactory::new();
    let refused = Captured::new();
    let sink = refused.clone();
    factory.open_with_upgrade("busy", 1, move |event| {
        event
            .connection
            .create_object_store("s", StoreParams::new())?;
        let err = event
            .connection
            .transaction(&["s"], tessera_core::TransactionMode::ReadOnly)
            .unwrap_err();
        sink.set(err.kind());
        Ok(())
    });
    assert_eq!(refused.get(), Some(ErrorKind::InvalidState));
}

#[test]
fn deleting_removes_stores() {
    let factory = TestFactory::new();
    let connection = factory.open_with_upgrade("gone", 1, create_people);
    connection.close();

    let delete = factory.delete_database("gone");
    factory.run();
    assert_eq!(delete.result(), Some(1));

    let reopened = factory.open_with_upgrade("gone", 1, |_| Ok(()));
    assert!(reopened.object_store_names().is_empty());
}
