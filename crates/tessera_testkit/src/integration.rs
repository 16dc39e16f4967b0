//! End-to-end helpers: a sample schema and shortcuts for reading back
//! what a test wrote.

use crate::fixtures::{Captured, TestFactory};
use parking_lot::Mutex;
use std::sync::Arc;
use tessera_codec::{Key, Value};
use tessera_core::{
    CallbackResult, Connection, IndexParams, Request, StoreParams, TransactionMode, UpgradeEvent,
};

/// Name of the sample store created by [`create_people`].
pub const PEOPLE: &str = "people";

/// Builds a sample record for the [`PEOPLE`] store.
pub fn person(id: i32, name: &str, email: &str) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("email", Value::from(email)),
    ])
}

/// Upgrade callback creating the [`PEOPLE`] store, keyed by `id`, with
/// a unique `by_email` index and a plain `by_name` index.
pub fn create_people(event: &UpgradeEvent) -> CallbackResult {
    let store = event
        .connection
        .create_object_store(PEOPLE, StoreParams::new().key_path("id"))?;
    store.create_index("by_email", "email", IndexParams::new().unique(true))?;
    store.create_index("by_name", "name", IndexParams::new())?;
    Ok(())
}

/// Reads every record of `store` in key order through a fresh
/// read-only transaction.
///
/// # Panics
///
/// Panics if the store cannot be read.
pub fn read_all(factory: &TestFactory, connection: &Connection, store: &str) -> Vec<Value> {
    let tx = connection
        .transaction(&[store], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let request = tx
        .object_store(store)
        .expect("Failed to open store")
        .get_all(None, None)
        .expect("Failed to issue get_all");
    let values = Captured::new();
    let sink = values.clone();
    request.on_success(move |event| {
        sink.set(event.result().as_values().map(<[Value]>::to_vec).unwrap_or_default());
        Ok(())
    });
    factory.run();
    values.take().expect("get_all did not complete")
}

/// Reads every primary key of `store` in order.
///
/// # Panics
///
/// Panics if the store cannot be read.
pub fn read_all_keys(factory: &TestFactory, connection: &Connection, store: &str) -> Vec<Key> {
    let tx = connection
        .transaction(&[store], TransactionMode::ReadOnly)
        .expect("Failed to start transaction");
    let request = tx
        .object_store(store)
        .expect("Failed to open store")
        .get_all_keys(None, None)
        .expect("Failed to issue get_all_keys");
    let keys = Captured::new();
    let sink = keys.clone();
    request.on_success(move |event| {
        sink.set(event.result().as_keys().map(<[Key]>::to_vec).unwrap_or_default());
        Ok(())
    });
    factory.run();
    keys.take().expect("get_all_keys did not complete")
}

/// Walks the cursor opened by `request` to the end, collecting each
/// (key, primary key) pair it visits.
pub fn drain_cursor(request: &Request) -> Arc<Mutex<Vec<(Key, Key)>>> {
    let visited = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&visited);
    request.on_success(move |event| {
        if let Some(cursor) = event.result().as_cursor() {
            if let (Some(key), Some(primary)) = (cursor.key(), cursor.primary_key()) {
                sink.lock().push((key, primary));
            }
            cursor.continue_(None)?;
        }
        Ok(())
    });
    visited
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn people_round_trip() {
        let factory = TestFactory::new();
        let connection = factory.open_with_upgrade("people", 1, create_people);
        let tx = connection
            .transaction(&[PEOPLE], TransactionMode::ReadWrite)
            .unwrap();
        let store = tx.object_store(PEOPLE).unwrap();
        store.put(&person(2, "Bo", "bo@example.com"), None).unwrap();
        store.put(&person(1, "Al", "al@example.com"), None).unwrap();
        factory.run();

        assert_eq!(
            read_all_keys(&factory, &connection, PEOPLE),
            vec![Key::from(1), Key::from(2)]
        );
        let names: Vec<Option<Value>> = read_all(&factory, &connection, PEOPLE)
            .iter()
            .map(|v| match v {
                Value::Object(o) => o.get("name"),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![Some(Value::from("Al")), Some(Value::from("Bo"))]
        );
    }
}
