//! Ordered multimap from index key to primary keys.

use crate::range::{is_empty_bounds, KeyRange};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tessera_codec::Key;

/// Secondary structure of one index.
///
/// Entries sharing an index key are ordered by primary key, so scans in
/// either direction see ties in ascending primary key order within a key.
#[derive(Debug, Default)]
pub struct IndexEntries {
    entries: BTreeMap<Key, BTreeSet<Key>>,
    len: usize,
}

impl IndexEntries {
    /// Creates an empty index structure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of (key, primary key) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds an entry. Returns false if it was already present.
    pub fn insert(&mut self, key: Key, primary: Key) -> bool {
        let added = self.entries.entry(key).or_default().insert(primary);
        if added {
            self.len += 1;
        }
        added
    }

    /// Removes an entry. Returns false if it was absent.
    pub fn remove(&mut self, key: &Key, primary: &Key) -> bool {
        let Some(primaries) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = primaries.remove(primary);
        if primaries.is_empty() {
            self.entries.remove(key);
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Returns true if `key` maps to a primary key other than `primary`.
    #[must_use]
    pub fn conflicts(&self, key: &Key, primary: &Key) -> bool {
        self.entries
            .get(key)
            .is_some_and(|primaries| primaries.iter().any(|p| p != primary))
    }

    /// Iterates entries in `range` as (index key, primary key) pairs.
    pub fn range<'a>(
        &'a self,
        range: Option<&'a KeyRange>,
    ) -> impl DoubleEndedIterator<Item = (&'a Key, &'a Key)> + 'a {
        let (lower, upper) = match range {
            Some(r) => (r.start_bound(), r.end_bound()),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        self.bounded(lower, upper)
            .flat_map(|(key, primaries)| primaries.iter().map(move |p| (key, p)))
    }

    /// Returns the first entry in `range`.
    #[must_use]
    pub fn first_in<'a>(&'a self, range: Option<&'a KeyRange>) -> Option<(&'a Key, &'a Key)> {
        self.range(range).next()
    }

    /// Counts entries in `range`.
    #[must_use]
    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        self.range(range).count()
    }

    /// Iterates index keys with their primary keys inside the bounds.
    pub(crate) fn bounded<'a>(
        &'a self,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
    ) -> impl DoubleEndedIterator<Item = (&'a Key, &'a BTreeSet<Key>)> + 'a {
        let live = (!is_empty_bounds(lower, upper))
            .then(|| self.entries.range::<Key, _>((lower, upper)));
        live.into_iter().flatten()
    }
}
