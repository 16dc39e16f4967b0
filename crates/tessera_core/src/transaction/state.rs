//! Transaction state.

use crate::connection::ConnectionSnapshot;
use crate::engine::Retired;
use crate::error::{CoreError, CoreResult};
use crate::events::{ErrorHandler, TransactionHandler};
use crate::types::{ConnectionId, IndexId, RequestId, StoreId, TransactionMode};
use std::collections::VecDeque;
use tessera_codec::{Key, Value};

/// State of a transaction.
///
/// A transaction that has been created but not yet started (because an
/// earlier conflicting transaction is still running) is `Active` or
/// `Inactive` with [`Transaction::is_started`](crate::Transaction::is_started)
/// returning false; its requests queue up until it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Requests may be issued.
    Active,
    /// Requests may not be issued; the transaction is waiting for queued
    /// requests or for auto-commit.
    Inactive,
    /// Commit was requested; queued requests still run.
    Committing,
    /// Committed or aborted.
    Finished,
}

/// Versions involved in an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpgradeInfo {
    /// Version before the upgrade.
    pub old_version: u64,
    /// Version being upgraded to.
    pub new_version: u64,
    /// The open request that triggered the upgrade.
    pub request: RequestId,
}

/// A reversible change made under a transaction.
#[derive(Debug, Clone)]
pub(crate) enum UndoEntry {
    /// A record was written or deleted; `previous` is what was there before.
    Record {
        /// Store holding the record.
        store: StoreId,
        /// Primary key.
        key: Key,
        /// Prior value, `None` if the key was absent.
        previous: Option<Value>,
    },
    /// A key generator moved.
    Generator {
        /// Store owning the generator.
        store: StoreId,
        /// Prior counter value.
        previous: u64,
    },
    /// A store was created.
    CreateStore {
        /// The new store.
        store: StoreId,
    },
    /// A store was deleted.
    DeleteStore {
        /// The deleted store.
        store: StoreId,
    },
    /// A store was renamed.
    RenameStore {
        /// The renamed store.
        store: StoreId,
        /// Name before the rename.
        previous_name: String,
    },
    /// An index was created.
    CreateIndex {
        /// The new index.
        index: IndexId,
    },
    /// An index was deleted.
    DeleteIndex {
        /// The deleted index.
        index: IndexId,
    },
    /// An index was renamed.
    RenameIndex {
        /// The renamed index.
        index: IndexId,
        /// Name before the rename.
        previous_name: String,
    },
}

/// What a transaction handle still reports after the record is dropped.
#[derive(Debug, Clone)]
pub(crate) struct TransactionSnapshot {
    pub started: bool,
    pub store_names: Vec<String>,
    pub error: Option<CoreError>,
}

/// Engine-side record of a transaction.
pub(crate) struct TransactionRecord {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Database name.
    pub database: String,
    /// Access mode.
    pub mode: TransactionMode,
    /// Sorted, deduplicated store names. Empty for upgrades, which cover
    /// every store.
    pub scope: Vec<String>,
    /// Current state.
    pub state: TransactionState,
    /// Whether the scheduler has let the transaction run.
    pub started: bool,
    /// Whether a step task is queued.
    pub step_scheduled: bool,
    /// Requests waiting to execute, in issue order.
    pub queue: VecDeque<RequestId>,
    /// Every request issued against the transaction.
    pub issued: Vec<RequestId>,
    /// Changes to revert on abort, oldest first.
    pub undo: Vec<UndoEntry>,
    /// Error that caused an abort.
    pub error: Option<CoreError>,
    /// Set for upgrade transactions.
    pub upgrade: Option<UpgradeInfo>,
    /// Complete handler.
    pub on_complete: Option<TransactionHandler>,
    /// Abort handler.
    pub on_abort: Option<TransactionHandler>,
    /// Handler for request errors bubbling up from requests.
    pub on_error: Option<ErrorHandler>,
    pub retired: Retired<TransactionSnapshot>,
    /// The owning connection's slot, for handles that outlive it.
    pub owner: Retired<ConnectionSnapshot>,
}

impl TransactionRecord {
    /// Creates an active, not yet started transaction.
    pub(crate) fn new(
        connection: ConnectionId,
        database: String,
        mode: TransactionMode,
        scope: Vec<String>,
    ) -> Self {
        Self {
            connection,
            database,
            mode,
            scope,
            state: TransactionState::Active,
            started: false,
            step_scheduled: false,
            queue: VecDeque::new(),
            issued: Vec::new(),
            undo: Vec::new(),
            error: None,
            upgrade: None,
            on_complete: None,
            on_abort: None,
            on_error: None,
            retired: Retired::default(),
            owner: Retired::default(),
        }
    }

    /// Returns true once committed or aborted.
    pub(crate) fn is_finished(&self) -> bool {
        self.state == TransactionState::Finished
    }

    /// Returns true if `name` is in scope.
    pub(crate) fn covers(&self, name: &str) -> bool {
        self.mode == TransactionMode::VersionChange
            || self.scope.binary_search_by(|s| s.as_str().cmp(name)).is_ok()
    }

    /// Ensures requests may be issued.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            _ => Err(CoreError::TransactionInactive),
        }
    }

    /// Ensures records may be written.
    pub(crate) fn ensure_writable(&self) -> CoreResult<()> {
        if self.mode.can_write() {
            Ok(())
        } else {
            Err(CoreError::ReadOnly)
        }
    }

    /// Ensures this is a running upgrade transaction.
    pub(crate) fn ensure_upgrade(&self) -> CoreResult<()> {
        if self.mode == TransactionMode::VersionChange && !self.is_finished() {
            Ok(())
        } else {
            Err(CoreError::invalid_state(
                "schema changes require a running upgrade transaction",
            ))
        }
    }

    /// Leaves the final state for the handles. `store_names` is the
    /// scope as the handles should report it from now on.
    pub(crate) fn retire(self, store_names: Vec<String>) {
        *self.retired.lock() = Some(TransactionSnapshot {
            started: self.started,
            store_names,
            error: self.error,
        });
    }
}
