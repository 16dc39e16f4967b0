//! Object store data: records, key generation and schema.

mod generator;
mod records;

pub use generator::KeyGenerator;
pub use records::RecordStore;

use crate::keypath::KeyPath;
use crate::types::IndexId;
use std::collections::BTreeMap;

/// Engine-side state of one object store.
#[derive(Debug)]
pub(crate) struct StoreState {
    /// Owning database.
    pub database: String,
    /// Current name.
    pub name: String,
    /// Inline key path, if any.
    pub key_path: Option<KeyPath>,
    /// Key generator for auto-increment stores.
    pub generator: Option<KeyGenerator>,
    /// The records.
    pub records: RecordStore,
    /// Live indexes by name.
    pub indexes: BTreeMap<String, IndexId>,
    /// Set once the store is deleted; cleared again if that is undone.
    pub deleted: bool,
}

impl StoreState {
    pub(crate) fn new(
        database: String,
        name: String,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Self {
        Self {
            database,
            name,
            key_path,
            generator: auto_increment.then(KeyGenerator::new),
            records: RecordStore::new(),
            indexes: BTreeMap::new(),
            deleted: false,
        }
    }
}
