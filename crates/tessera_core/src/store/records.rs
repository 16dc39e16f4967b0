//! Ordered record storage.

use crate::range::KeyRange;
use std::collections::BTreeMap;
use std::ops::Bound;
use tessera_codec::{Key, Value};

/// Ordered map from primary key to stored value.
///
/// Values held here are private clones; callers clone again on read.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: BTreeMap<Key, Value>,
}

impl RecordStore {
    /// Creates an empty record store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    /// Returns true if a record exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.records.contains_key(key)
    }

    /// Stores a record, returning the value it replaced.
    pub fn insert(&mut self, key: Key, value: Value) -> Option<Value> {
        self.records.insert(key, value)
    }

    /// Removes a record.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.records.remove(key)
    }

    /// Iterates records in `range` in ascending key order.
    pub fn range<'a>(
        &'a self,
        range: Option<&'a KeyRange>,
    ) -> impl DoubleEndedIterator<Item = (&'a Key, &'a Value)> + 'a {
        let bounds: (Bound<&Key>, Bound<&Key>) = match range {
            Some(r) => (r.start_bound(), r.end_bound()),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        self.records.range::<Key, _>(bounds)
    }

    /// Returns the first record in `range`.
    #[must_use]
    pub fn first_in<'a>(&'a self, range: Option<&'a KeyRange>) -> Option<(&'a Key, &'a Value)> {
        self.range(range).next()
    }

    /// Returns the keys in `range`.
    #[must_use]
    pub fn keys_in(&self, range: Option<&KeyRange>) -> Vec<Key> {
        self.range(range).map(|(k, _)| k.clone()).collect()
    }

    /// Counts records in `range`.
    #[must_use]
    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        self.range(range).count()
    }

    /// Iterates all records with keys inside the given bounds.
    pub(crate) fn bounded<'a>(
        &'a self,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
    ) -> impl DoubleEndedIterator<Item = (&'a Key, &'a Value)> + 'a {
        let live = (!crate::range::is_empty_bounds(lower, upper))
            .then(|| self.records.range::<Key, _>((lower, upper)));
        live.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(keys: &[i32]) -> RecordStore {
        let mut store = RecordStore::new();
        for k in keys {
            store.insert(Key::from(*k), Value::from(*k * 10));
        }
        store
    }

    #[test]
    fn insert_replaces() {
        let mut store = RecordStore::new();
        assert!(store.insert(Key::from(1), Value::from("a")).is_none());
        assert_eq!(
            store.insert(Key::from(1), Value::from("b")),
            Some(Value::from("a"))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn range_queries() {
        let store = store_with(&[1, 2, 3, 4, 5]);
        let range = KeyRange::bound(2, 4, false, true).unwrap();
        assert_eq!(store.keys_in(Some(&range)), vec![Key::from(2), Key::from(3)]);
        assert_eq!(store.count(None), 5);
        assert_eq!(
            store.first_in(Some(&KeyRange::lower_bound(3, true))).map(|(k, _)| k.clone()),
            Some(Key::from(4))
        );
    }

    #[test]
    fn reverse_iteration() {
        let store = store_with(&[1, 2, 3]);
        let keys: Vec<Key> = store.range(None).rev().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Key::from(3), Key::from(2), Key::from(1)]);
    }

    #[test]
    fn bounded_handles_empty_bounds() {
        let store = store_with(&[1, 2, 3]);
        let two = Key::from(2);
        let one = Key::from(1);
        assert_eq!(
            store
                .bounded(Bound::Excluded(&two), Bound::Excluded(&two))
                .count(),
            0
        );
        assert_eq!(
            store.bounded(Bound::Included(&two), Bound::Included(&one)).count(),
            0
        );
        assert_eq!(
            store.bounded(Bound::Included(&one), Bound::Excluded(&two)).count(),
            1
        );
    }
}
