//! Events delivered to user callbacks.

use crate::connection::Connection;
use crate::error::{CallbackResult, CoreError};
use crate::request::{Request, RequestResult};
use crate::transaction::Transaction;

/// Delivered when a request succeeds.
pub struct SuccessEvent {
    request: Request,
    result: RequestResult,
}

impl SuccessEvent {
    pub(crate) fn new(request: Request, result: RequestResult) -> Self {
        Self { request, result }
    }

    /// The request that succeeded.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request's result.
    #[must_use]
    pub fn result(&self) -> &RequestResult {
        &self.result
    }
}

/// Delivered when a request fails.
///
/// The event goes to the request first and then to its transaction.
/// Unless a handler calls [`prevent_default`](Self::prevent_default), the
/// transaction aborts with the request's error.
pub struct ErrorEvent {
    request: Request,
    error: CoreError,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl ErrorEvent {
    pub(crate) fn new(request: Request, error: CoreError) -> Self {
        Self {
            request,
            error,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    /// The request that failed.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The failure.
    #[must_use]
    pub fn error(&self) -> &CoreError {
        &self.error
    }

    /// Keeps the transaction alive despite the failure.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Returns true once [`prevent_default`](Self::prevent_default) was called.
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Stops the event from reaching the transaction's handler.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub(crate) fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Delivered to open connections when another request wants to change
/// the version, and to delete requests on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Version before the change.
    pub old_version: u64,
    /// Version after the change; `None` when the database is deleted.
    pub new_version: Option<u64>,
}

/// Delivered to an open request when its database must be upgraded.
pub struct UpgradeEvent {
    /// The new connection.
    pub connection: Connection,
    /// The upgrade transaction; schema changes go through it.
    pub transaction: Transaction,
    /// Version before the upgrade, 0 for a new database.
    pub old_version: u64,
    /// Version being upgraded to.
    pub new_version: u64,
}

pub(crate) type SuccessHandler = Box<dyn FnMut(&SuccessEvent) -> CallbackResult + Send>;
pub(crate) type ErrorHandler = Box<dyn FnMut(&mut ErrorEvent) -> CallbackResult + Send>;
pub(crate) type TransactionHandler = Box<dyn FnMut(&Transaction) -> CallbackResult + Send>;
pub(crate) type VersionChangeHandler =
    Box<dyn FnMut(&VersionChangeEvent) -> CallbackResult + Send>;
pub(crate) type UpgradeHandler = Box<dyn FnMut(&UpgradeEvent) -> CallbackResult + Send>;
pub(crate) type OpenSuccessHandler = Box<dyn FnMut(&Connection) -> CallbackResult + Send>;
pub(crate) type FailureHandler = Box<dyn FnMut(&CoreError) -> CallbackResult + Send>;
