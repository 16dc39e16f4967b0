//! Deferred operations.
//!
//! Request methods validate their arguments synchronously and capture the
//! work as an [`Operation`]. The transaction runs it later, under the
//! engine lock, when the request reaches the front of its queue.

use crate::cursor;
use crate::engine::EngineState;
use crate::error::CoreResult;
use crate::range::KeyRange;
use crate::request::Outcome;
use crate::types::{CursorId, IndexId, StoreId, TransactionId};
use tessera_codec::{Key, Value};

/// Where a read looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Store(StoreId),
    Index(IndexId),
}

#[derive(Debug)]
pub(crate) enum Operation {
    /// Writes a record. `key` is `None` when it will be generated.
    Put {
        store: StoreId,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    },
    /// First match in `range`: its value, or its primary key.
    Get {
        source: Source,
        range: KeyRange,
        keys_only: bool,
    },
    /// Matches in `range`, up to `count`.
    GetAll {
        source: Source,
        range: Option<KeyRange>,
        count: Option<u32>,
        keys_only: bool,
    },
    Count {
        source: Source,
        range: Option<KeyRange>,
    },
    /// Deletes records in `range`, or every record if `None`.
    Delete {
        store: StoreId,
        range: Option<KeyRange>,
    },
    /// Moves a cursor `count` steps, honoring an optional target.
    Iterate {
        cursor: CursorId,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    },
    /// Builds a new index from existing records.
    PopulateIndex { index: IndexId },
}

impl Operation {
    pub(crate) fn execute(self, st: &mut EngineState, tx: TransactionId) -> CoreResult<Outcome> {
        match self {
            Operation::Put {
                store,
                value,
                key,
                no_overwrite,
            } => st
                .put_record(tx, store, value, key, no_overwrite)
                .map(Outcome::Key),
            Operation::Get {
                source,
                range,
                keys_only,
            } => get(st, source, &range, keys_only),
            Operation::GetAll {
                source,
                range,
                count,
                keys_only,
            } => get_all(st, source, range.as_ref(), count, keys_only),
            Operation::Count { source, range } => count(st, source, range.as_ref()),
            Operation::Delete { store, range } => st
                .delete_records(tx, store, range.as_ref())
                .map(|()| Outcome::Undefined),
            Operation::Iterate {
                cursor,
                key,
                primary_key,
                count,
            } => cursor::iterate(st, cursor, key.as_ref(), primary_key.as_ref(), count),
            Operation::PopulateIndex { index } => {
                st.populate_index(index).map(|()| Outcome::Undefined)
            }
        }
    }
}

/// Clones the record stored under `primary`.
pub(crate) fn read_value(st: &EngineState, store: StoreId, primary: &Key) -> CoreResult<Option<Value>> {
    let value = st
        .store(store)?
        .records
        .get(primary)
        .map(Value::structured_clone)
        .transpose()?;
    Ok(value)
}

fn get(st: &EngineState, source: Source, range: &KeyRange, keys_only: bool) -> CoreResult<Outcome> {
    let (store, primary) = match source {
        Source::Store(id) => {
            let found = st.store(id)?.records.first_in(Some(range));
            (id, found.map(|(key, _)| key.clone()))
        }
        Source::Index(id) => {
            let index = st.index(id)?;
            let found = index.entries.first_in(Some(range));
            (index.store, found.map(|(_, primary)| primary.clone()))
        }
    };
    let Some(primary) = primary else {
        return Ok(Outcome::Undefined);
    };
    if keys_only {
        return Ok(Outcome::Key(primary));
    }
    Ok(read_value(st, store, &primary)?.map_or(Outcome::Undefined, Outcome::Value))
}

fn get_all(
    st: &EngineState,
    source: Source,
    range: Option<&KeyRange>,
    count: Option<u32>,
    keys_only: bool,
) -> CoreResult<Outcome> {
    let limit = count.map_or(usize::MAX, |c| c as usize);
    let (store, primaries): (StoreId, Vec<Key>) = match source {
        Source::Store(id) => (
            id,
            st.store(id)?
                .records
                .range(range)
                .take(limit)
                .map(|(key, _)| key.clone())
                .collect(),
        ),
        Source::Index(id) => {
            let index = st.index(id)?;
            (
                index.store,
                index
                    .entries
                    .range(range)
                    .take(limit)
                    .map(|(_, primary)| primary.clone())
                    .collect(),
            )
        }
    };
    if keys_only {
        return Ok(Outcome::Keys(primaries));
    }
    let mut values = Vec::with_capacity(primaries.len());
    for primary in &primaries {
        if let Some(value) = read_value(st, store, primary)? {
            values.push(value);
        }
    }
    Ok(Outcome::Values(values))
}

fn count(st: &EngineState, source: Source, range: Option<&KeyRange>) -> CoreResult<Outcome> {
    let n = match source {
        Source::Store(id) => st.store(id)?.records.count(range),
        Source::Index(id) => st.index(id)?.entries.count(range),
    };
    Ok(Outcome::Count(n as u64))
}
