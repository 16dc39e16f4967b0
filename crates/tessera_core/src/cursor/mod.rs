//! Cursors over object stores and indexes.
//!
//! A cursor is opened by a request and reuses that request for every
//! step: each call to [`Cursor::advance`] or [`Cursor::continue_`] re-arms
//! it, and its success callback sees the cursor again, or `None` once the
//! range is exhausted.

mod iterate;

pub(crate) use iterate::iterate;

use crate::engine::{Engine, EngineState, Retired};
use crate::error::{CoreError, CoreResult};
use crate::operation::{Operation, Source};
use crate::range::KeyRange;
use crate::request::{Request, RequestSource};
use crate::types::{CursorDirection, CursorId, RequestId, StoreId, TransactionId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tessera_codec::{Key, Value};

/// What a cursor handle still reports after the record is dropped.
#[derive(Debug, Clone)]
pub(crate) struct CursorSnapshot {
    pub direction: CursorDirection,
    pub index: bool,
    pub key: Option<Key>,
    pub primary_key: Option<Key>,
    pub value: Option<Value>,
}

/// Engine-side record of a cursor.
pub(crate) struct CursorRecord {
    pub transaction: TransactionId,
    pub source: Source,
    /// The store whose records the cursor yields.
    pub store: StoreId,
    pub direction: CursorDirection,
    pub range: Option<KeyRange>,
    pub key_only: bool,
    /// The request that delivers each step.
    pub request: RequestId,
    pub position: Option<Key>,
    pub object_store_position: Option<Key>,
    pub key: Option<Key>,
    pub primary_key: Option<Key>,
    pub value: Option<Value>,
    /// False while a step is in flight or after the range ran out.
    pub got_value: bool,
    pub retired: Retired<CursorSnapshot>,
}

impl CursorRecord {
    /// Leaves the final position for the handles.
    pub(crate) fn retire(self) {
        *self.retired.lock() = Some(CursorSnapshot {
            direction: self.direction,
            index: matches!(self.source, Source::Index(_)),
            key: self.key,
            primary_key: self.primary_key,
            value: self.value,
        });
    }
}

/// Opens a cursor and queues its first step.
#[allow(clippy::too_many_arguments)]
pub(crate) fn open(
    engine: &Arc<Engine>,
    st: &mut EngineState,
    transaction: TransactionId,
    source: Source,
    store: StoreId,
    range: Option<KeyRange>,
    direction: CursorDirection,
    key_only: bool,
) -> CoreResult<Request> {
    let id = CursorId::new(st.allocate());
    let request = st.issue(
        transaction,
        RequestSource::Cursor(id),
        Operation::Iterate {
            cursor: id,
            key: None,
            primary_key: None,
            count: 1,
        },
        false,
    )?;
    st.cursors.insert(
        id,
        CursorRecord {
            transaction,
            source,
            store,
            direction,
            range,
            key_only,
            request,
            position: None,
            object_store_position: None,
            key: None,
            primary_key: None,
            value: None,
            got_value: false,
            retired: Retired::default(),
        },
    );
    Request::lookup(engine, st, request)
}

/// Handle to a cursor.
#[derive(Clone)]
pub struct Cursor {
    id: CursorId,
    request: Request,
    retired: Retired<CursorSnapshot>,
}

impl Cursor {
    pub(crate) fn from_parts(id: CursorId, request: Request, retired: Retired<CursorSnapshot>) -> Self {
        Self {
            id,
            request,
            retired,
        }
    }

    fn engine(&self) -> &Arc<Engine> {
        self.request.engine()
    }

    fn read<R>(
        &self,
        live: impl FnOnce(&CursorRecord) -> R,
        retired: impl FnOnce(&CursorSnapshot) -> R,
    ) -> Option<R> {
        let st = self.engine().state();
        match st.cursors.get(&self.id) {
            Some(record) => Some(live(record)),
            None => self.retired.lock().as_ref().map(retired),
        }
    }

    /// Returns the cursor ID.
    #[must_use]
    pub fn id(&self) -> CursorId {
        self.id
    }

    /// Returns the iteration direction.
    #[must_use]
    pub fn direction(&self) -> CursorDirection {
        self.read(|c| c.direction, |c| c.direction)
            .unwrap_or_default()
    }

    /// Returns true if the cursor iterates an index.
    #[must_use]
    pub fn is_index_cursor(&self) -> bool {
        self.read(|c| matches!(c.source, Source::Index(_)), |c| c.index)
            .unwrap_or(false)
    }

    /// Key at the current position: the index key for index cursors.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.read(|c| c.key.clone(), |c| c.key.clone()).flatten()
    }

    /// Primary key of the current record.
    #[must_use]
    pub fn primary_key(&self) -> Option<Key> {
        self.read(|c| c.primary_key.clone(), |c| c.primary_key.clone())
            .flatten()
    }

    /// Value of the current record; always `None` for key cursors.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.read(|c| c.value.clone(), |c| c.value.clone()).flatten()
    }

    /// The request that delivers each step.
    #[must_use]
    pub fn request(&self) -> Option<Request> {
        Some(self.request.clone())
    }

    /// Moves forward `count` records.
    ///
    /// # Errors
    ///
    /// Type error for a zero count; transaction inactive; invalid state if
    /// the source was deleted or the cursor is mid-step or exhausted.
    pub fn advance(&self, count: u32) -> CoreResult<()> {
        if count == 0 {
            return Err(CoreError::type_error("advance count must be positive"));
        }
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        self.check_movable(st)?;
        self.rearm(st, None, None, count)
    }

    /// Moves to the next record, or to the first record at or past `key`.
    ///
    /// # Errors
    ///
    /// As for [`advance`](Self::advance), plus a data error if `key` does
    /// not lie beyond the current position in the iteration direction.
    pub fn continue_(&self, key: Option<Key>) -> CoreResult<()> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let cursor = self.check_movable(st)?;
        if let (Some(target), Some(position)) = (&key, &cursor.position) {
            let ordering = target.cmp(position);
            let behind = if cursor.direction.is_forward() {
                ordering != Ordering::Greater
            } else {
                ordering != Ordering::Less
            };
            if behind {
                return Err(CoreError::data(format!(
                    "key {target} does not lie beyond the cursor position"
                )));
            }
        }
        self.rearm(st, key, None, 1)
    }

    /// Moves an index cursor to the entry at or past (`key`, `primary_key`).
    ///
    /// # Errors
    ///
    /// Invalid access for store cursors and unique directions; otherwise as
    /// for [`continue_`](Self::continue_).
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> CoreResult<()> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let cursor = self.cursor(st)?;
        st.active_transaction(cursor.transaction)?;
        self.check_source(st, cursor)?;
        if matches!(cursor.source, Source::Store(_)) || cursor.direction.is_unique() {
            return Err(CoreError::invalid_access(
                "continue_primary_key needs an index cursor with a non-unique direction",
            ));
        }
        if !cursor.got_value {
            return Err(CoreError::invalid_state("cursor is not positioned on a record"));
        }
        if let (Some(position), Some(store_position)) =
            (&cursor.position, &cursor.object_store_position)
        {
            let forward = cursor.direction.is_forward();
            let behind = match key.cmp(position) {
                Ordering::Less => forward,
                Ordering::Greater => !forward,
                Ordering::Equal => match primary_key.cmp(store_position) {
                    Ordering::Less => forward,
                    Ordering::Greater => !forward,
                    Ordering::Equal => true,
                },
            };
            if behind {
                return Err(CoreError::data(
                    "key and primary key do not lie beyond the cursor position",
                ));
            }
        }
        self.rearm(st, Some(key), Some(primary_key), 1)
    }

    /// Replaces the current record.
    ///
    /// # Errors
    ///
    /// Transaction inactive; read-only; invalid state if the source was
    /// deleted, the cursor is not on a record or is a key cursor; data
    /// clone errors; data error if the value's inline key differs from
    /// the current primary key.
    pub fn update(&self, value: &Value) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let (cursor, primary) = self.check_writable(st)?;
        let (transaction, store) = (cursor.transaction, cursor.store);
        let copy = value.structured_clone()?;
        if let Some(path) = &st.store(store)?.key_path {
            match path.extract_key(&copy)? {
                Some(key) if key == primary => {}
                _ => {
                    return Err(CoreError::data(
                        "updated value's key does not match the cursor's primary key",
                    ))
                }
            }
        }
        let request = st.issue(
            transaction,
            RequestSource::Cursor(self.id),
            Operation::Put {
                store,
                value: copy,
                key: Some(primary),
                no_overwrite: false,
            },
            false,
        )?;
        Request::lookup(self.engine(), st, request)
    }

    /// Deletes the current record.
    ///
    /// # Errors
    ///
    /// As for [`update`](Self::update), without the value checks.
    pub fn delete(&self) -> CoreResult<Request> {
        let mut guard = self.engine().state();
        let st: &mut EngineState = &mut guard;
        let (cursor, primary) = self.check_writable(st)?;
        let (transaction, store) = (cursor.transaction, cursor.store);
        let request = st.issue(
            transaction,
            RequestSource::Cursor(self.id),
            Operation::Delete {
                store,
                range: Some(KeyRange::only(primary)),
            },
            false,
        )?;
        Request::lookup(self.engine(), st, request)
    }

    /// The cursor's record. It is dropped with its finished transaction.
    fn cursor<'a>(&self, st: &'a EngineState) -> CoreResult<&'a CursorRecord> {
        st.cursors.get(&self.id).ok_or(CoreError::TransactionInactive)
    }

    fn check_source(&self, st: &EngineState, cursor: &CursorRecord) -> CoreResult<()> {
        match cursor.source {
            Source::Store(store) => st.live_store(store).map(|_| ()),
            Source::Index(index) => st.live_index(index).map(|_| ()),
        }
    }

    fn check_movable<'a>(&self, st: &'a EngineState) -> CoreResult<&'a CursorRecord> {
        let cursor = self.cursor(st)?;
        st.active_transaction(cursor.transaction)?;
        self.check_source(st, cursor)?;
        if !cursor.got_value {
            return Err(CoreError::invalid_state("cursor is not positioned on a record"));
        }
        Ok(cursor)
    }

    fn check_writable<'a>(&self, st: &'a EngineState) -> CoreResult<(&'a CursorRecord, Key)> {
        let cursor = self.cursor(st)?;
        st.active_transaction(cursor.transaction)?
            .ensure_writable()?;
        self.check_source(st, cursor)?;
        if !cursor.got_value {
            return Err(CoreError::invalid_state("cursor is not positioned on a record"));
        }
        if cursor.key_only {
            return Err(CoreError::invalid_state("key cursors cannot modify records"));
        }
        let primary = cursor
            .primary_key
            .clone()
            .ok_or_else(|| CoreError::invalid_state("cursor is not positioned on a record"))?;
        Ok((cursor, primary))
    }

    /// Queues the next step on the cursor's request.
    fn rearm(
        &self,
        st: &mut EngineState,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    ) -> CoreResult<()> {
        let cursor = st
            .cursors
            .get_mut(&self.id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown cursor {}", self.id)))?;
        cursor.got_value = false;
        let (request, transaction) = (cursor.request, cursor.transaction);
        if let Some(record) = st.requests.get_mut(&request) {
            record.rearm(Operation::Iterate {
                cursor: self.id,
                key,
                primary_key,
                count,
            });
        }
        st.transaction_mut(transaction)?.queue.push_back(request);
        Ok(())
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("id", &self.id).finish()
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.engine(), other.engine()) && self.id == other.id
    }
}

impl Eq for Cursor {}
