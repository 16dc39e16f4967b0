//! Object store handles.

use crate::cursor;
use crate::engine::{Engine, EngineState};
use crate::error::{CoreError, CoreResult};
use crate::index::{Index, IndexParams};
use crate::keypath::KeyPath;
use crate::operation::{Operation, Source};
use crate::range::{self, Query};
use crate::request::{Request, RequestSource};
use crate::transaction::Transaction;
use crate::types::{CursorDirection, StoreId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tessera_codec::{Key, Value};
use tracing::debug;

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParams {
    /// Where records carry their own key. `None` means keys are passed
    /// separately.
    pub key_path: Option<KeyPath>,
    /// Whether the store generates keys.
    pub auto_increment: bool,
}

impl StoreParams {
    /// Out-of-line keys, no generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key path.
    #[must_use]
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Enables or disables key generation.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// Handle to an object store within one transaction.
#[derive(Clone)]
pub struct ObjectStore {
    transaction: Transaction,
    store: StoreId,
}

impl ObjectStore {
    pub(crate) fn from_parts(transaction: Transaction, store: StoreId) -> Self {
        Self { transaction, store }
    }

    fn engine(&self) -> &Arc<Engine> {
        self.transaction.engine()
    }

    /// Returns the store ID.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.store
    }

    /// Returns the current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.engine()
            .state()
            .stores
            .get(&self.store)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Returns the key path, if keys are inline.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.engine()
            .state()
            .stores
            .get(&self.store)
            .and_then(|s| s.key_path.clone())
    }

    /// Returns true if the store generates keys.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.engine()
            .state()
            .stores
            .get(&self.store)
            .is_some_and(|s| s.generator.is_some())
    }

    /// Names of the store's indexes, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.engine()
            .state()
            .stores
            .get(&self.store)
            .map(|s| s.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the transaction this handle belongs to.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        self.transaction.clone()
    }

    fn check_read(&self, st: &EngineState) -> CoreResult<()> {
        st.live_store(self.store)?;
        st.active_transaction(self.transaction.id()).map(|_| ())
    }

    fn check_write(&self, st: &EngineState) -> CoreResult<()> {
        st.live_store(self.store)?;
        st.active_transaction(self.transaction.id())?
            .ensure_writable()
    }

    fn issue(&self, st: &mut EngineState, operation: Operation) -> CoreResult<Request> {
        let id = st.issue(
            self.transaction.id(),
            RequestSource::Store(self.store),
            operation,
            false,
        )?;
        Request::lookup(self.engine(), st, id)
    }

    fn store_value(&self, value: &Value, key: Option<Key>, no_overwrite: bool) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_write(st)?;
        let store = st.store(self.store)?;
        let key_path = store.key_path.clone();
        let generates = store.generator.is_some();
        match (&key_path, &key) {
            (Some(_), Some(_)) => {
                return Err(CoreError::data(
                    "store uses inline keys; an explicit key is not allowed",
                ))
            }
            (None, None) if !generates => {
                return Err(CoreError::data(
                    "store has no key path and no key generator; a key is required",
                ))
            }
            _ => {}
        }
        let copy = value.structured_clone()?;
        let key = match &key_path {
            Some(path) => match path.extract_key(&copy)? {
                Some(found) => Some(found),
                None if generates => {
                    if !path.can_inject(&copy) {
                        return Err(CoreError::data(format!(
                            "cannot write a generated key into the value at {path}"
                        )));
                    }
                    None
                }
                None => {
                    return Err(CoreError::data(format!(
                        "key path {path} does not yield a key"
                    )))
                }
            },
            None => key,
        };
        self.issue(
            st,
            Operation::Put {
                store: self.store,
                value: copy,
                key,
                no_overwrite,
            },
        )
    }

    /// Writes a record, replacing any record with the same key.
    ///
    /// `key` must be given for stores without a key path or generator and
    /// omitted for stores with a key path.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted; transaction inactive;
    /// read-only; data errors for key problems; data clone errors.
    pub fn put(&self, value: &Value, key: Option<Key>) -> CoreResult<Request> {
        self.store_value(value, key, false)
    }

    /// Writes a record; the request fails with a constraint error if the
    /// key exists.
    ///
    /// # Errors
    ///
    /// As for [`put`](Self::put).
    pub fn add(&self, value: &Value, key: Option<Key>) -> CoreResult<Request> {
        self.store_value(value, key, true)
    }

    /// Reads the first record matching `query`.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted; transaction inactive; data
    /// error for an invalid query.
    pub fn get(&self, query: impl Into<Query>) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = query.into().into_range()?;
        self.issue(
            st,
            Operation::Get {
                source: Source::Store(self.store),
                range,
                keys_only: false,
            },
        )
    }

    /// Reads the first key matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_key(&self, query: impl Into<Query>) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = query.into().into_range()?;
        self.issue(
            st,
            Operation::Get {
                source: Source::Store(self.store),
                range,
                keys_only: true,
            },
        )
    }

    fn read_many(&self, query: Option<Query>, count: Option<u32>, keys_only: bool) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = range::resolve(query)?;
        self.issue(
            st,
            Operation::GetAll {
                source: Source::Store(self.store),
                range,
                count: count.filter(|&c| c > 0),
                keys_only,
            },
        )
    }

    /// Reads records matching `query` in key order, at most `count` of
    /// them. A count of `None` or zero means no limit.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> CoreResult<Request> {
        self.read_many(query, count, false)
    }

    /// Reads keys matching `query`, like [`get_all`](Self::get_all).
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> CoreResult<Request> {
        self.read_many(query, count, true)
    }

    /// Counts records matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn count(&self, query: Option<Query>) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = range::resolve(query)?;
        self.issue(
            st,
            Operation::Count {
                source: Source::Store(self.store),
                range,
            },
        )
    }

    /// Deletes records matching `query`.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted; transaction inactive;
    /// read-only; data error for an invalid query.
    pub fn delete(&self, query: impl Into<Query>) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_write(st)?;
        let range = query.into().into_range()?;
        self.issue(
            st,
            Operation::Delete {
                store: self.store,
                range: Some(range),
            },
        )
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted; transaction inactive;
    /// read-only.
    pub fn clear(&self) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_write(st)?;
        self.issue(
            st,
            Operation::Delete {
                store: self.store,
                range: None,
            },
        )
    }

    fn cursor(&self, query: Option<Query>, direction: CursorDirection, key_only: bool) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = range::resolve(query)?;
        cursor::open(
            self.engine(),
            st,
            self.transaction.id(),
            Source::Store(self.store),
            self.store,
            range,
            direction,
            key_only,
        )
    }

    /// Opens a cursor over records matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn open_cursor(&self, query: Option<Query>, direction: CursorDirection) -> CoreResult<Request> {
        self.cursor(query, direction, false)
    }

    /// Opens a cursor over keys matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn open_key_cursor(&self, query: Option<Query>, direction: CursorDirection) -> CoreResult<Request> {
        self.cursor(query, direction, true)
    }

    /// Returns a handle to an index of this store.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted or the transaction has
    /// finished; not found if there is no such index.
    pub fn index(&self, name: &str) -> CoreResult<Index> {
        let st = self.engine().state();
        let store = st.live_store(self.store)?;
        if st
            .transactions
            .get(&self.transaction.id())
            .map_or(true, |t| t.is_finished())
        {
            return Err(CoreError::invalid_state("transaction has finished"));
        }
        let index = store
            .indexes
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::not_found(format!("index {name}")))?;
        Ok(Index::from_parts(self.transaction.clone(), index))
    }

    /// Creates an index and fills it from the existing records.
    ///
    /// Only allowed during an upgrade. If a unique index cannot be built
    /// because records share a key, the upgrade aborts with a constraint
    /// error.
    ///
    /// # Errors
    ///
    /// Invalid state outside an upgrade or if the store was deleted;
    /// transaction inactive; constraint error if the name is taken;
    /// syntax error for a bad key path; invalid access for a multi-entry
    /// index on a composite key path.
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        params: IndexParams,
    ) -> CoreResult<Index> {
        let key_path = key_path.into();
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        st.transaction(self.transaction.id())?.ensure_upgrade()?;
        let store = st.live_store(self.store)?;
        st.transaction(self.transaction.id())?.ensure_active()?;
        if store.indexes.contains_key(name) {
            return Err(CoreError::constraint(format!("index {name} already exists")));
        }
        key_path.validate()?;
        if params.multi_entry && key_path.is_sequence() {
            return Err(CoreError::invalid_access(
                "a multi-entry index cannot use a composite key path",
            ));
        }
        debug!(store = %self.store, index = name, %key_path, "creating index");
        let index = st.create_index(
            self.transaction.id(),
            self.store,
            name,
            key_path,
            params.unique,
            params.multi_entry,
        )?;
        st.issue(
            self.transaction.id(),
            RequestSource::Index(index),
            Operation::PopulateIndex { index },
            true,
        )?;
        Ok(Index::from_parts(self.transaction.clone(), index))
    }

    /// Deletes an index. Only allowed during an upgrade.
    ///
    /// # Errors
    ///
    /// Invalid state outside an upgrade or if the store was deleted;
    /// transaction inactive; not found if there is no such index.
    pub fn delete_index(&self, name: &str) -> CoreResult<()> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        st.transaction(self.transaction.id())?.ensure_upgrade()?;
        let store = st.live_store(self.store)?;
        st.transaction(self.transaction.id())?.ensure_active()?;
        let index = store
            .indexes
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::not_found(format!("index {name}")))?;
        debug!(store = %self.store, index = name, "deleting index");
        st.delete_index(self.transaction.id(), index)
    }

    /// Renames the store. Only allowed during an upgrade; renaming to the
    /// current name does nothing.
    ///
    /// # Errors
    ///
    /// Invalid state if the store was deleted or outside an upgrade;
    /// transaction inactive; constraint error if the name is taken.
    pub fn rename(&self, new_name: &str) -> CoreResult<()> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let store = st.live_store(self.store)?;
        let transaction = st.transaction(self.transaction.id())?;
        transaction.ensure_upgrade()?;
        transaction.ensure_active()?;
        if store.name == new_name {
            return Ok(());
        }
        let taken = st
            .databases
            .get(&store.database)
            .is_some_and(|db| db.stores.contains_key(new_name));
        if taken {
            return Err(CoreError::constraint(format!(
                "object store {new_name} already exists"
            )));
        }
        debug!(store = %self.store, from = %store.name, to = new_name, "renaming object store");
        st.rename_store(self.transaction.id(), self.store, new_name)
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("store", &self.store)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}
