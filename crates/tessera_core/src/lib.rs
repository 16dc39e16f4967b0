//! # Tessera Core
//!
//! In-memory transactional key-value engine for Tessera.
//!
//! This crate provides:
//! - Named, versioned databases with a FIFO open/delete queue and
//!   blocking between old and new connections
//! - Object stores with inline or out-of-line keys and key generators
//! - Secondary indexes, including unique and multi-entry indexes
//! - Cursors over stores and indexes in four directions
//! - Transactions that serialize by scope and mode, auto-commit, and
//!   roll back data and schema changes on abort
//!
//! Everything runs on a deterministic event loop owned by the
//! [`Factory`]. Calls queue requests; results are delivered to callbacks
//! while the loop runs.
//!
//! ```
//! use tessera_core::{Factory, IndexParams, StoreParams, TransactionMode};
//! use tessera_codec::{Key, Value};
//! use std::sync::{Arc, Mutex};
//!
//! let factory = Factory::new();
//! let open = factory.open("people", Some(1)).unwrap();
//! open.on_upgrade_needed(|event| {
//!     let store = event
//!         .connection
//!         .create_object_store("people", StoreParams::new().key_path("id"))?;
//!     store.create_index("by_name", "name", IndexParams::new())?;
//!     Ok(())
//! });
//! factory.run_until_idle();
//! let connection = open.result().unwrap();
//!
//! let tx = connection.transaction(&["people"], TransactionMode::ReadWrite).unwrap();
//! let store = tx.object_store("people").unwrap();
//! let ada = Value::object([("id", Value::from(1)), ("name", Value::from("Ada"))]);
//! store.put(&ada, None).unwrap();
//!
//! let found = Arc::new(Mutex::new(None));
//! let sink = Arc::clone(&found);
//! store
//!     .index("by_name")
//!     .unwrap()
//!     .get_key(Key::from("Ada"))
//!     .unwrap()
//!     .on_success(move |event| {
//!         *sink.lock().unwrap() = event.result().as_key().cloned();
//!         Ok(())
//!     });
//! factory.run_until_idle();
//! assert_eq!(*found.lock().unwrap(), Some(Key::from(1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod cursor;
mod database;
mod engine;
mod error;
mod events;
mod factory;
mod index;
mod keypath;
mod lifecycle;
mod object_store;
mod operation;
mod range;
mod request;
mod scheduler;
mod store;
mod transaction;
mod types;

pub use config::Config;
pub use connection::Connection;
pub use cursor::Cursor;
pub use error::{CallbackResult, CoreError, CoreResult, ErrorKind};
pub use events::{ErrorEvent, SuccessEvent, UpgradeEvent, VersionChangeEvent};
pub use factory::Factory;
pub use index::{derive_keys, Index, IndexEntries, IndexParams};
pub use keypath::KeyPath;
pub use lifecycle::{DeleteRequest, OpenRequest};
pub use object_store::{ObjectStore, StoreParams};
pub use range::{KeyRange, Query};
pub use request::{ReadyState, Request, RequestResult};
pub use scheduler::{EventLoop, Job};
pub use store::{KeyGenerator, RecordStore};
pub use transaction::{Transaction, TransactionState};
pub use types::{
    ConnectionId, CursorDirection, CursorId, DatabaseInfo, IndexId, RequestId, StoreId,
    TransactionId, TransactionMode, MAX_GENERATED_KEY,
};
