//! Record writes and their reversal.
//!
//! Every write pushes an [`UndoEntry`] onto the owning transaction so an
//! abort can walk the log backwards and restore the prior state,
//! including index entries and key generators.

use super::EngineState;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexState;
use crate::range::KeyRange;
use crate::transaction::UndoEntry;
use crate::types::{IndexId, StoreId, TransactionId};
use std::collections::HashMap;
use tessera_codec::{Key, Value};

fn add_entries(
    indexes: &mut HashMap<IndexId, IndexState>,
    ids: &[IndexId],
    primary: &Key,
    value: &Value,
) {
    for id in ids {
        if let Some(index) = indexes.get_mut(id) {
            for key in index.keys_for(value) {
                index.entries.insert(key, primary.clone());
            }
        }
    }
}

fn remove_entries(
    indexes: &mut HashMap<IndexId, IndexState>,
    ids: &[IndexId],
    primary: &Key,
    value: &Value,
) {
    for id in ids {
        if let Some(index) = indexes.get_mut(id) {
            for key in index.keys_for(value) {
                index.entries.remove(&key, primary);
            }
        }
    }
}

impl EngineState {
    /// Writes a record.
    ///
    /// `key` is `None` only when the store generates keys; the generated
    /// key is then injected into `value` if the store has a key path.
    /// Returns the key the record was stored under.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn put_record(
        &mut self,
        tx: TransactionId,
        store_id: StoreId,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> CoreResult<Key> {
        let Self {
            stores,
            indexes,
            transactions,
            ..
        } = self;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown store {store_id}")))?;
        let undo = &mut transactions
            .get_mut(&tx)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown transaction {tx}")))?
            .undo;

        let mut key = key;
        if let Some(generator) = store.generator.as_mut() {
            let previous = generator.current();
            match &key {
                None => {
                    let generated = Key::number(generator.generate()? as f64);
                    undo.push(UndoEntry::Generator {
                        store: store_id,
                        previous,
                    });
                    if let Some(path) = &store.key_path {
                        path.inject(&value, &generated)?;
                    }
                    key = Some(generated);
                }
                Some(Key::Number(n)) => {
                    if generator.observe(*n) {
                        undo.push(UndoEntry::Generator {
                            store: store_id,
                            previous,
                        });
                    }
                }
                Some(_) => {}
            }
        }
        let key = key.ok_or_else(|| CoreError::data("record has no key"))?;

        if no_overwrite && store.records.contains(&key) {
            return Err(CoreError::constraint(format!(
                "key {key} already exists in object store {}",
                store.name
            )));
        }

        let ids: Vec<IndexId> = store.indexes.values().copied().collect();
        let mut derived = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(index) = indexes.get(id) else {
                continue;
            };
            let keys = index.keys_for(&value);
            if index.unique {
                if let Some(clash) = keys.iter().find(|k| index.entries.conflicts(k, &key)) {
                    return Err(CoreError::constraint(format!(
                        "index {} already contains key {clash}",
                        index.name
                    )));
                }
            }
            derived.push((*id, keys));
        }

        let previous = store.records.remove(&key);
        if let Some(old) = &previous {
            remove_entries(indexes, &ids, &key, old);
        }
        for (id, keys) in derived {
            if let Some(index) = indexes.get_mut(&id) {
                for index_key in keys {
                    index.entries.insert(index_key, key.clone());
                }
            }
        }
        store.records.insert(key.clone(), value);
        undo.push(UndoEntry::Record {
            store: store_id,
            key: key.clone(),
            previous,
        });
        Ok(key)
    }

    /// Deletes every record in `range`, or all records if `None`.
    pub(crate) fn delete_records(
        &mut self,
        tx: TransactionId,
        store_id: StoreId,
        range: Option<&KeyRange>,
    ) -> CoreResult<()> {
        let Self {
            stores,
            indexes,
            transactions,
            ..
        } = self;
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown store {store_id}")))?;
        let undo = &mut transactions
            .get_mut(&tx)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown transaction {tx}")))?
            .undo;
        let ids: Vec<IndexId> = store.indexes.values().copied().collect();
        for key in store.records.keys_in(range) {
            if let Some(old) = store.records.remove(&key) {
                remove_entries(indexes, &ids, &key, &old);
                undo.push(UndoEntry::Record {
                    store: store_id,
                    key,
                    previous: Some(old),
                });
            }
        }
        Ok(())
    }

    /// Fills a freshly created index from its store's records.
    ///
    /// Fails with a constraint error if a unique index would receive two
    /// records under one key.
    pub(crate) fn populate_index(&mut self, index_id: IndexId) -> CoreResult<()> {
        let Self {
            stores, indexes, ..
        } = self;
        let index = indexes
            .get_mut(&index_id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown index {index_id}")))?;
        let store = stores
            .get(&index.store)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown store {}", index.store)))?;
        for (primary, value) in store.records.range(None) {
            for key in index.keys_for(value) {
                if index.unique && index.entries.conflicts(&key, primary) {
                    return Err(CoreError::constraint(format!(
                        "index {} cannot be unique: key {key} is shared",
                        index.name
                    )));
                }
                index.entries.insert(key, primary.clone());
            }
        }
        Ok(())
    }

    /// Reverts one logged change.
    pub(crate) fn revert(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Record {
                store,
                key,
                previous,
            } => {
                let Self {
                    stores, indexes, ..
                } = self;
                let Some(state) = stores.get_mut(&store) else {
                    return;
                };
                let ids: Vec<IndexId> = state.indexes.values().copied().collect();
                if let Some(current) = state.records.remove(&key) {
                    remove_entries(indexes, &ids, &key, &current);
                }
                if let Some(previous) = previous {
                    add_entries(indexes, &ids, &key, &previous);
                    state.records.insert(key, previous);
                }
            }
            UndoEntry::Generator { store, previous } => {
                if let Some(generator) = self
                    .stores
                    .get_mut(&store)
                    .and_then(|s| s.generator.as_mut())
                {
                    generator.restore(previous);
                }
            }
            UndoEntry::CreateStore { store } => {
                if let Some(state) = self.stores.get_mut(&store) {
                    state.deleted = true;
                    if let Some(db) = self.databases.get_mut(&state.database) {
                        if db.stores.get(&state.name) == Some(&store) {
                            db.stores.remove(&state.name);
                        }
                    }
                }
            }
            UndoEntry::DeleteStore { store } => {
                if let Some(state) = self.stores.get_mut(&store) {
                    state.deleted = false;
                    if let Some(db) = self.databases.get_mut(&state.database) {
                        db.stores.insert(state.name.clone(), store);
                    }
                }
            }
            UndoEntry::RenameStore {
                store,
                previous_name,
            } => {
                if let Some(state) = self.stores.get_mut(&store) {
                    if let Some(db) = self.databases.get_mut(&state.database) {
                        db.stores.remove(&state.name);
                        db.stores.insert(previous_name.clone(), store);
                    }
                    state.name = previous_name;
                }
            }
            UndoEntry::CreateIndex { index } => {
                if let Some(state) = self.indexes.get_mut(&index) {
                    state.deleted = true;
                    if let Some(store) = self.stores.get_mut(&state.store) {
                        if store.indexes.get(&state.name) == Some(&index) {
                            store.indexes.remove(&state.name);
                        }
                    }
                }
            }
            UndoEntry::DeleteIndex { index } => {
                if let Some(state) = self.indexes.get_mut(&index) {
                    state.deleted = false;
                    if let Some(store) = self.stores.get_mut(&state.store) {
                        store.indexes.insert(state.name.clone(), index);
                    }
                }
            }
            UndoEntry::RenameIndex {
                index,
                previous_name,
            } => {
                if let Some(state) = self.indexes.get_mut(&index) {
                    if let Some(store) = self.stores.get_mut(&state.store) {
                        store.indexes.remove(&state.name);
                        store.indexes.insert(previous_name.clone(), index);
                    }
                    state.name = previous_name;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath::KeyPath;
    use crate::store::StoreState;
    use crate::transaction::TransactionRecord;
    use crate::types::{ConnectionId, TransactionMode};
    use serde_json::json;

    struct Fixture {
        state: EngineState,
        tx: TransactionId,
        store: StoreId,
    }

    fn fixture(key_path: Option<&str>, auto_increment: bool) -> Fixture {
        let mut state = EngineState::default();
        let tx = TransactionId::new(state.allocate());
        state.transactions.insert(
            tx,
            TransactionRecord::new(
                ConnectionId::new(0),
                "db".to_string(),
                TransactionMode::ReadWrite,
                vec!["s".to_string()],
            ),
        );
        let store = StoreId::new(state.allocate());
        state.stores.insert(
            store,
            StoreState::new(
                "db".to_string(),
                "s".to_string(),
                key_path.map(KeyPath::from),
                auto_increment,
            ),
        );
        Fixture { state, tx, store }
    }

    fn add_index(f: &mut Fixture, name: &str, path: &str, unique: bool, multi: bool) -> IndexId {
        let id = IndexId::new(f.state.allocate());
        f.state.indexes.insert(
            id,
            IndexState::new(f.store, name.to_string(), KeyPath::from(path), unique, multi),
        );
        f.state
            .stores
            .get_mut(&f.store)
            .unwrap()
            .indexes
            .insert(name.to_string(), id);
        id
    }

    fn rollback(f: &mut Fixture) {
        let undo = std::mem::take(&mut f.state.transactions.get_mut(&f.tx).unwrap().undo);
        for entry in undo.into_iter().rev() {
            f.state.revert(entry);
        }
    }

    #[test]
    fn generated_keys_are_injected() {
        let mut f = fixture(Some("id"), true);
        let value = Value::from(json!({"name": "a"}));
        let key = f
            .state
            .put_record(f.tx, f.store, value.clone(), None, false)
            .unwrap();
        assert_eq!(key, Key::from(1));
        assert_eq!(value.to_json(), json!({"name": "a", "id": 1}));
    }

    #[test]
    fn explicit_keys_advance_generator() {
        let mut f = fixture(None, true);
        f.state
            .put_record(f.tx, f.store, Value::from(1), Some(Key::from(10.5)), false)
            .unwrap();
        let key = f
            .state
            .put_record(f.tx, f.store, Value::from(2), None, false)
            .unwrap();
        assert_eq!(key, Key::from(11));
    }

    #[test]
    fn no_overwrite_rejects_existing_key() {
        let mut f = fixture(None, false);
        f.state
            .put_record(f.tx, f.store, Value::from(1), Some(Key::from("k")), true)
            .unwrap();
        let err = f
            .state
            .put_record(f.tx, f.store, Value::from(2), Some(Key::from("k")), true)
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let mut f = fixture(Some("id"), false);
        let index = add_index(&mut f, "by_email", "email", true, false);
        f.state
            .put_record(
                f.tx,
                f.store,
                Value::from(json!({"id": 1, "email": "a@x"})),
                Some(Key::from(1)),
                false,
            )
            .unwrap();
        // Overwriting the same record keeps its own entry.
        f.state
            .put_record(
                f.tx,
                f.store,
                Value::from(json!({"id": 1, "email": "a@x", "n": 2})),
                Some(Key::from(1)),
                false,
            )
            .unwrap();
        let err = f
            .state
            .put_record(
                f.tx,
                f.store,
                Value::from(json!({"id": 2, "email": "a@x"})),
                Some(Key::from(2)),
                false,
            )
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");
        assert_eq!(f.state.indexes[&index].entries.len(), 1);
        assert_eq!(f.state.stores[&f.store].records.len(), 1);
    }

    #[test]
    fn rollback_restores_records_and_indexes() {
        let mut f = fixture(Some("id"), true);
        let index = add_index(&mut f, "by_tag", "tags", false, true);
        f.state
            .put_record(
                f.tx,
                f.store,
                Value::from(json!({"id": 1, "tags": ["a"]})),
                Some(Key::from(1)),
                false,
            )
            .unwrap();
        f.state.transactions.get_mut(&f.tx).unwrap().undo.clear();

        f.state
            .put_record(
                f.tx,
                f.store,
                Value::from(json!({"id": 1, "tags": ["b", "c"]})),
                Some(Key::from(1)),
                false,
            )
            .unwrap();
        f.state
            .put_record(f.tx, f.store, Value::from(json!({"tags": []})), None, false)
            .unwrap();
        f.state.delete_records(f.tx, f.store, None).unwrap();
        assert!(f.state.stores[&f.store].records.is_empty());

        rollback(&mut f);
        let store = &f.state.stores[&f.store];
        assert_eq!(store.records.len(), 1);
        assert_eq!(
            store.records.get(&Key::from(1)).unwrap().to_json(),
            json!({"id": 1, "tags": ["a"]})
        );
        assert_eq!(store.generator.unwrap().current(), 2);
        let entries: Vec<Key> = f.state.indexes[&index]
            .entries
            .range(None)
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(entries, vec![Key::from("a")]);
    }

    #[test]
    fn populate_detects_shared_unique_keys() {
        let mut f = fixture(Some("id"), false);
        for (id, email) in [(1, "a"), (2, "a")] {
            f.state
                .put_record(
                    f.tx,
                    f.store,
                    Value::from(json!({"id": id, "email": email})),
                    Some(Key::from(id)),
                    false,
                )
                .unwrap();
        }
        let id = IndexId::new(f.state.allocate());
        f.state.indexes.insert(
            id,
            IndexState::new(f.store, "e".to_string(), KeyPath::from("email"), true, false),
        );
        assert_eq!(
            f.state.populate_index(id).unwrap_err().name(),
            "ConstraintError"
        );
    }
}
