//! Per-database bookkeeping.

use crate::types::{RequestId, StoreId};
use std::collections::{BTreeMap, VecDeque};

/// Engine-side state of one named database.
///
/// A record with version 0 stands for a database that does not exist
/// yet, or no longer does.
#[derive(Debug, Default)]
pub(crate) struct DatabaseRecord {
    /// Committed version.
    pub version: u64,
    /// Live stores by name, including uncommitted upgrade changes.
    pub stores: BTreeMap<String, StoreId>,
    /// Open and delete requests waiting their turn.
    pub queue: VecDeque<RequestId>,
    /// The open or delete request being processed.
    pub active: Option<RequestId>,
}

impl DatabaseRecord {
    /// Returns true once a version has been committed.
    pub(crate) fn exists(&self) -> bool {
        self.version > 0
    }

    /// Store names in sorted order.
    pub(crate) fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_database_does_not_exist() {
        let mut db = DatabaseRecord::default();
        assert!(!db.exists());
        db.version = 1;
        assert!(db.exists());
    }

    #[test]
    fn store_names_are_sorted() {
        let mut db = DatabaseRecord::default();
        db.stores.insert("b".to_string(), StoreId::new(2));
        db.stores.insert("a".to_string(), StoreId::new(1));
        assert_eq!(db.store_names(), vec!["a", "b"]);
    }
}
