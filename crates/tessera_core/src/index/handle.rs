//! Index handles.

use crate::cursor;
use crate::engine::{Engine, EngineState};
use crate::error::{CoreError, CoreResult};
use crate::keypath::KeyPath;
use crate::object_store::ObjectStore;
use crate::operation::{Operation, Source};
use crate::range::{self, Query};
use crate::request::{Request, RequestSource};
use crate::transaction::Transaction;
use crate::types::{CursorDirection, IndexId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Options for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Reject records whose index key is already used by another record.
    pub unique: bool,
    /// Index each element of an array value separately.
    pub multi_entry: bool,
}

impl IndexParams {
    /// A plain, non-unique index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unique: false,
            multi_entry: false,
        }
    }

    /// Sets uniqueness.
    #[must_use]
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets multi-entry behavior.
    #[must_use]
    pub const fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}

/// Handle to an index within one transaction.
#[derive(Clone)]
pub struct Index {
    transaction: Transaction,
    index: IndexId,
}

impl Index {
    pub(crate) fn from_parts(transaction: Transaction, index: IndexId) -> Self {
        Self { transaction, index }
    }

    fn engine(&self) -> &Arc<Engine> {
        self.transaction.engine()
    }

    /// Returns the index ID.
    #[must_use]
    pub fn id(&self) -> IndexId {
        self.index
    }

    /// Returns the current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.engine()
            .state()
            .indexes
            .get(&self.index)
            .map(|i| i.name.clone())
            .unwrap_or_default()
    }

    /// Returns the key path.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.engine()
            .state()
            .indexes
            .get(&self.index)
            .map(|i| i.key_path.clone())
    }

    /// Returns true for unique indexes.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.engine()
            .state()
            .indexes
            .get(&self.index)
            .is_some_and(|i| i.unique)
    }

    /// Returns true for multi-entry indexes.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.engine()
            .state()
            .indexes
            .get(&self.index)
            .is_some_and(|i| i.multi_entry)
    }

    /// Returns the store the index belongs to.
    #[must_use]
    pub fn object_store(&self) -> Option<ObjectStore> {
        let store = self.engine().state().indexes.get(&self.index)?.store;
        Some(ObjectStore::from_parts(self.transaction.clone(), store))
    }

    fn check_read(&self, st: &EngineState) -> CoreResult<()> {
        st.live_index(self.index)?;
        st.active_transaction(self.transaction.id()).map(|_| ())
    }

    fn read(&self, build: impl FnOnce(Source) -> CoreResult<Operation>) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let operation = build(Source::Index(self.index))?;
        let id = st.issue(
            self.transaction.id(),
            RequestSource::Index(self.index),
            operation,
            false,
        )?;
        Request::lookup(self.engine(), st, id)
    }

    /// Reads the record of the first entry matching `query`.
    ///
    /// # Errors
    ///
    /// Invalid state if the index or its store was deleted; transaction
    /// inactive; data error for an invalid query.
    pub fn get(&self, query: impl Into<Query>) -> CoreResult<Request> {
        let query = query.into();
        self.read(|source| {
            Ok(Operation::Get {
                source,
                range: query.into_range()?,
                keys_only: false,
            })
        })
    }

    /// Reads the primary key of the first entry matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_key(&self, query: impl Into<Query>) -> CoreResult<Request> {
        let query = query.into();
        self.read(|source| {
            Ok(Operation::Get {
                source,
                range: query.into_range()?,
                keys_only: true,
            })
        })
    }

    /// Reads records of entries matching `query` in index order.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> CoreResult<Request> {
        self.read(|source| {
            Ok(Operation::GetAll {
                source,
                range: range::resolve(query)?,
                count: count.filter(|&c| c > 0),
                keys_only: false,
            })
        })
    }

    /// Reads primary keys of entries matching `query` in index order.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> CoreResult<Request> {
        self.read(|source| {
            Ok(Operation::GetAll {
                source,
                range: range::resolve(query)?,
                count: count.filter(|&c| c > 0),
                keys_only: true,
            })
        })
    }

    /// Counts entries matching `query`.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn count(&self, query: Option<Query>) -> CoreResult<Request> {
        self.read(|source| {
            Ok(Operation::Count {
                source,
                range: range::resolve(query)?,
            })
        })
    }

    fn cursor(&self, query: Option<Query>, direction: CursorDirection, key_only: bool) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_read(st)?;
        let range = range::resolve(query)?;
        let store = st.index(self.index)?.store;
        cursor::open(
            self.engine(),
            st,
            self.transaction.id(),
            Source::Index(self.index),
            store,
            range,
            direction,
            key_only,
        )
    }

    /// Opens a cursor over entries matching `query`, yielding records.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn open_cursor(&self, query: Option<Query>, direction: CursorDirection) -> CoreResult<Request> {
        self.cursor(query, direction, false)
    }

    /// Opens a cursor over entries matching `query`, yielding keys only.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub fn open_key_cursor(&self, query: Option<Query>, direction: CursorDirection) -> CoreResult<Request> {
        self.cursor(query, direction, true)
    }

    /// Renames the index. Only allowed during an upgrade; renaming to the
    /// current name does nothing.
    ///
    /// # Errors
    ///
    /// Invalid state outside an upgrade or if the index was deleted;
    /// transaction inactive; constraint error if the name is taken.
    pub fn rename(&self, new_name: &str) -> CoreResult<()> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let transaction = st.transaction(self.transaction.id())?;
        transaction.ensure_upgrade()?;
        transaction.ensure_active()?;
        let index = st.live_index(self.index)?;
        if index.name == new_name {
            return Ok(());
        }
        let taken = st
            .stores
            .get(&index.store)
            .is_some_and(|s| s.indexes.contains_key(new_name));
        if taken {
            return Err(CoreError::constraint(format!("index {new_name} already exists")));
        }
        debug!(index = %self.index, from = %index.name, to = new_name, "renaming index");
        st.rename_index(self.transaction.id(), self.index, new_name)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("index", &self.index)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}
