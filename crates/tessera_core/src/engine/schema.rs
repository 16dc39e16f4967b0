//! Schema changes made by upgrade transactions.
//!
//! Callers check preconditions; these functions apply the change and log
//! how to undo it.

use super::EngineState;
use crate::error::CoreResult;
use crate::index::IndexState;
use crate::keypath::KeyPath;
use crate::store::StoreState;
use crate::transaction::UndoEntry;
use crate::types::{IndexId, StoreId, TransactionId};
use tracing::trace;

impl EngineState {
    fn log(&mut self, tx: TransactionId, entry: UndoEntry) -> CoreResult<()> {
        self.transaction_mut(tx)?.undo.push(entry);
        Ok(())
    }

    pub(crate) fn create_store(
        &mut self,
        tx: TransactionId,
        database: &str,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> CoreResult<StoreId> {
        let id = StoreId::new(self.allocate());
        self.stores.insert(
            id,
            StoreState::new(
                database.to_string(),
                name.to_string(),
                key_path,
                auto_increment,
            ),
        );
        self.database_mut(database)
            .stores
            .insert(name.to_string(), id);
        self.log(tx, UndoEntry::CreateStore { store: id })?;
        Ok(id)
    }

    pub(crate) fn delete_store(&mut self, tx: TransactionId, store: StoreId) -> CoreResult<()> {
        let state = self.stores.get_mut(&store);
        if let Some(state) = state {
            state.deleted = true;
            if let Some(db) = self.databases.get_mut(&state.database) {
                db.stores.remove(&state.name);
            }
        }
        self.log(tx, UndoEntry::DeleteStore { store })
    }

    pub(crate) fn rename_store(
        &mut self,
        tx: TransactionId,
        store: StoreId,
        new_name: &str,
    ) -> CoreResult<()> {
        let Some(state) = self.stores.get_mut(&store) else {
            return Ok(());
        };
        let previous_name = std::mem::replace(&mut state.name, new_name.to_string());
        if let Some(db) = self.databases.get_mut(&state.database) {
            db.stores.remove(&previous_name);
            db.stores.insert(new_name.to_string(), store);
        }
        self.log(
            tx,
            UndoEntry::RenameStore {
                store,
                previous_name,
            },
        )
    }

    pub(crate) fn create_index(
        &mut self,
        tx: TransactionId,
        store: StoreId,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> CoreResult<IndexId> {
        let id = IndexId::new(self.allocate());
        self.indexes.insert(
            id,
            IndexState::new(store, name.to_string(), key_path, unique, multi_entry),
        );
        if let Some(state) = self.stores.get_mut(&store) {
            state.indexes.insert(name.to_string(), id);
        }
        self.log(tx, UndoEntry::CreateIndex { index: id })?;
        Ok(id)
    }

    pub(crate) fn delete_index(&mut self, tx: TransactionId, index: IndexId) -> CoreResult<()> {
        if let Some(state) = self.indexes.get_mut(&index) {
            state.deleted = true;
            if let Some(store) = self.stores.get_mut(&state.store) {
                store.indexes.remove(&state.name);
            }
        }
        self.log(tx, UndoEntry::DeleteIndex { index })
    }

    pub(crate) fn rename_index(
        &mut self,
        tx: TransactionId,
        index: IndexId,
        new_name: &str,
    ) -> CoreResult<()> {
        let Some(state) = self.indexes.get_mut(&index) else {
            return Ok(());
        };
        let previous_name = std::mem::replace(&mut state.name, new_name.to_string());
        if let Some(store) = self.stores.get_mut(&state.store) {
            store.indexes.remove(&previous_name);
            store.indexes.insert(new_name.to_string(), index);
        }
        self.log(
            tx,
            UndoEntry::RenameIndex {
                index,
                previous_name,
            },
        )
    }

    /// Drops stores and indexes of `database` that stayed deleted once its
    /// upgrade finished, along with their records.
    pub(crate) fn purge_deleted(&mut self, database: &str) {
        let before = self.stores.len();
        self.stores
            .retain(|_, s| !(s.deleted && s.database == database));
        let stores = &self.stores;
        self.indexes.retain(|_, i| {
            stores
                .get(&i.store)
                .is_some_and(|s| !(i.deleted && s.database == database))
        });
        if before != self.stores.len() {
            trace!(%database, purged = before - self.stores.len(), "deleted object stores dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionRecord;
    use crate::types::{ConnectionId, TransactionMode};

    fn upgrade_state() -> (EngineState, TransactionId) {
        let mut state = EngineState::default();
        let tx = TransactionId::new(state.allocate());
        state.transactions.insert(
            tx,
            TransactionRecord::new(
                ConnectionId::new(0),
                "db".to_string(),
                TransactionMode::VersionChange,
                Vec::new(),
            ),
        );
        (state, tx)
    }

    fn undo_all(state: &mut EngineState, tx: TransactionId) {
        let undo = std::mem::take(&mut state.transactions.get_mut(&tx).unwrap().undo);
        for entry in undo.into_iter().rev() {
            state.revert(entry);
        }
    }

    #[test]
    fn create_rename_delete_then_revert() {
        let (mut state, tx) = upgrade_state();
        let store = state.create_store(tx, "db", "a", None, false).unwrap();
        state.rename_store(tx, store, "b").unwrap();
        assert_eq!(state.databases["db"].store_names(), vec!["b"]);
        state.delete_store(tx, store).unwrap();
        assert!(state.databases["db"].stores.is_empty());

        undo_all(&mut state, tx);
        assert!(state.databases["db"].stores.is_empty());
        assert!(state.stores[&store].deleted);
        assert_eq!(state.stores[&store].name, "a");
    }

    #[test]
    fn index_rename_reverts() {
        let (mut state, tx) = upgrade_state();
        let store = state.create_store(tx, "db", "s", None, false).unwrap();
        state.transactions.get_mut(&tx).unwrap().undo.clear();

        let index = state
            .create_index(tx, store, "i", KeyPath::from("x"), false, false)
            .unwrap();
        state.transactions.get_mut(&tx).unwrap().undo.clear();

        state.rename_index(tx, index, "j").unwrap();
        assert!(state.stores[&store].indexes.contains_key("j"));
        undo_all(&mut state, tx);
        assert_eq!(state.stores[&store].indexes.get("i"), Some(&index));
        assert!(!state.stores[&store].indexes.contains_key("j"));
    }

    #[test]
    fn purge_drops_only_deleted_schema_of_database() {
        let (mut state, tx) = upgrade_state();
        let kept = state.create_store(tx, "db", "kept", None, false).unwrap();
        let dropped = state.create_store(tx, "db", "dropped", None, false).unwrap();
        let other = state.create_store(tx, "other", "gone", None, false).unwrap();
        let live = state
            .create_index(tx, kept, "live", KeyPath::from("x"), false, false)
            .unwrap();
        let dead = state
            .create_index(tx, kept, "dead", KeyPath::from("y"), false, false)
            .unwrap();
        let orphan = state
            .create_index(tx, dropped, "orphan", KeyPath::from("z"), false, false)
            .unwrap();
        state.delete_index(tx, dead).unwrap();
        state.delete_store(tx, dropped).unwrap();
        state.delete_store(tx, other).unwrap();

        state.purge_deleted("db");
        assert!(state.stores.contains_key(&kept));
        assert!(!state.stores.contains_key(&dropped));
        assert!(state.stores.contains_key(&other));
        assert!(state.indexes.contains_key(&live));
        assert!(!state.indexes.contains_key(&dead));
        assert!(!state.indexes.contains_key(&orphan));
    }
}
