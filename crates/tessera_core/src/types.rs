//! Core type definitions for Tessera.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw ID value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a connection.
    ConnectionId,
    "conn"
);

define_id!(
    /// Identifier of a transaction.
    ///
    /// Transaction IDs increase in creation order and are never reused,
    /// so they double as the FIFO order for conflicting transactions.
    TransactionId,
    "txn"
);

define_id!(
    /// Identifier of a request, including open and delete requests.
    RequestId,
    "req"
);

define_id!(
    /// Identifier of a cursor.
    CursorId,
    "cur"
);

define_id!(
    /// Identifier of an object store.
    ///
    /// A store keeps its ID across renames.
    StoreId,
    "store"
);

define_id!(
    /// Identifier of an index.
    IndexId,
    "idx"
);

/// Largest key a key generator will produce (2^53 - 1).
pub const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_991;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and record writes.
    ReadWrite,
    /// Schema changes during an upgrade; exclusive over the database.
    VersionChange,
}

impl TransactionMode {
    /// Returns true if records may be written.
    #[must_use]
    pub const fn can_write(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        };
        f.write_str(name)
    }
}

/// Direction of a cursor scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorDirection {
    /// Ascending, every record.
    #[default]
    Next,
    /// Ascending, first record per distinct key.
    NextUnique,
    /// Descending, every record.
    Prev,
    /// Descending, first record per distinct key.
    PrevUnique,
}

impl CursorDirection {
    /// Returns true for ascending directions.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    /// Returns true for the unique directions.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(
            self,
            CursorDirection::NextUnique | CursorDirection::PrevUnique
        )
    }
}

/// A committed database and its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Committed version.
    pub version: u64,
}
