//! Secondary indexes.
//!
//! An index maps keys derived from each record's value back to the
//! record's primary key. Derivation failures leave the record out of the
//! index. A `multi_entry` index over an array value gets one entry per
//! distinct valid element.

mod entries;
mod handle;

pub use entries::IndexEntries;
pub use handle::{Index, IndexParams};

use crate::keypath::KeyPath;
use crate::types::StoreId;
use std::collections::BTreeSet;
use tessera_codec::{Key, Value};

/// Engine-side state of one index.
#[derive(Debug)]
pub(crate) struct IndexState {
    /// Store the index belongs to.
    pub store: StoreId,
    /// Current name.
    pub name: String,
    /// Key path evaluated against record values.
    pub key_path: KeyPath,
    /// Whether index keys must be unique across records.
    pub unique: bool,
    /// Whether array values fan out into one entry per element.
    pub multi_entry: bool,
    /// The entries.
    pub entries: IndexEntries,
    /// Set once the index is deleted; cleared again if that is undone.
    pub deleted: bool,
}

impl IndexState {
    pub(crate) fn new(
        store: StoreId,
        name: String,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Self {
        Self {
            store,
            name,
            key_path,
            unique,
            multi_entry,
            entries: IndexEntries::new(),
            deleted: false,
        }
    }

    /// Keys this index derives from `value`.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        derive_keys(&self.key_path, self.multi_entry, value)
    }
}

/// Derives index keys from a record value.
pub fn derive_keys(key_path: &KeyPath, multi_entry: bool, value: &Value) -> Vec<Key> {
    let Some(found) = key_path.evaluate(value) else {
        return Vec::new();
    };
    match (&found, multi_entry) {
        (Value::Array(array), true) => {
            let distinct: BTreeSet<Key> = array
                .slots()
                .iter()
                .flatten()
                .filter_map(|element| Key::from_value(element).ok())
                .collect();
            distinct.into_iter().collect()
        }
        _ => Key::from_value(&found).into_iter().collect(),
    }
}
