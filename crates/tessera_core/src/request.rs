//! Asynchronous requests.
//!
//! Every data operation returns a [`Request`] immediately. The operation
//! itself runs later, on a task, when its transaction reaches it; the
//! outcome is then delivered to the request's callbacks.

use crate::cursor::{Cursor, CursorSnapshot};
use crate::engine::{Engine, EngineState, Retired};
use crate::error::{CallbackResult, CoreError, CoreResult};
use crate::events::{ErrorEvent, ErrorHandler, SuccessEvent, SuccessHandler};
use crate::operation::Operation;
use crate::transaction::Transaction;
use crate::types::{CursorId, IndexId, RequestId, StoreId, TransactionId};
use std::fmt;
use std::sync::Arc;
use tessera_codec::{Key, Value};

/// Whether a request has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Waiting to run.
    Pending,
    /// Finished with a result or an error.
    Done,
}

/// The result of a successful request.
#[derive(Debug, Clone)]
pub enum RequestResult {
    /// No value: a missing record, or an operation without output.
    Undefined,
    /// A record value.
    Value(Value),
    /// A key.
    Key(Key),
    /// Record values.
    Values(Vec<Value>),
    /// Keys.
    Keys(Vec<Key>),
    /// A number of records.
    Count(u64),
    /// The cursor after an iteration step, `None` once exhausted.
    Cursor(Option<Cursor>),
}

impl RequestResult {
    /// Returns true for [`RequestResult::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, RequestResult::Undefined)
    }

    /// The value, if this is a value result.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RequestResult::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The key, if this is a key result.
    #[must_use]
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            RequestResult::Key(key) => Some(key),
            _ => None,
        }
    }

    /// The values, if this is a multi-value result.
    #[must_use]
    pub fn as_values(&self) -> Option<&[Value]> {
        match self {
            RequestResult::Values(values) => Some(values),
            _ => None,
        }
    }

    /// The keys, if this is a multi-key result.
    #[must_use]
    pub fn as_keys(&self) -> Option<&[Key]> {
        match self {
            RequestResult::Keys(keys) => Some(keys),
            _ => None,
        }
    }

    /// The count, if this is a count result.
    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self {
            RequestResult::Count(count) => Some(*count),
            _ => None,
        }
    }

    /// The cursor, if this is a cursor result that has not run out.
    #[must_use]
    pub fn as_cursor(&self) -> Option<&Cursor> {
        match self {
            RequestResult::Cursor(cursor) => cursor.as_ref(),
            _ => None,
        }
    }
}

/// Engine-side form of [`RequestResult`].
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Undefined,
    Value(Value),
    Key(Key),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    Count(u64),
    Cursor(Option<(CursorId, Retired<CursorSnapshot>)>),
}

impl Outcome {
    /// Converts to the public form. `request` is the request that produced
    /// the outcome; cursors hand it out as their own.
    pub(crate) fn into_result(self, request: &Request) -> RequestResult {
        match self {
            Outcome::Undefined => RequestResult::Undefined,
            Outcome::Value(value) => RequestResult::Value(value),
            Outcome::Key(key) => RequestResult::Key(key),
            Outcome::Values(values) => RequestResult::Values(values),
            Outcome::Keys(keys) => RequestResult::Keys(keys),
            Outcome::Count(count) => RequestResult::Count(count),
            Outcome::Cursor(cursor) => RequestResult::Cursor(
                cursor.map(|(id, retired)| Cursor::from_parts(id, request.clone(), retired)),
            ),
        }
    }
}

/// What a request was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestSource {
    Store(StoreId),
    Index(IndexId),
    Cursor(CursorId),
}

/// What a request handle still reports after the record is dropped.
#[derive(Debug, Clone)]
pub(crate) struct RequestSnapshot {
    pub outcome: Option<Outcome>,
    pub error: Option<CoreError>,
}

/// Engine-side record of a request.
pub(crate) struct RequestRecord {
    pub transaction: TransactionId,
    pub source: RequestSource,
    pub ready: ReadyState,
    pub outcome: Option<Outcome>,
    pub error: Option<CoreError>,
    /// The operation still to run.
    pub operation: Option<Operation>,
    /// Internal requests have no callbacks; their failure aborts the
    /// transaction directly.
    pub internal: bool,
    pub on_success: Option<SuccessHandler>,
    pub on_error: Option<ErrorHandler>,
    pub retired: Retired<RequestSnapshot>,
}

impl RequestRecord {
    pub(crate) fn new(
        transaction: TransactionId,
        source: RequestSource,
        operation: Operation,
        internal: bool,
    ) -> Self {
        Self {
            transaction,
            source,
            ready: ReadyState::Pending,
            outcome: None,
            error: None,
            operation: Some(operation),
            internal,
            on_success: None,
            on_error: None,
            retired: Retired::default(),
        }
    }

    /// Records the outcome of running the operation.
    pub(crate) fn complete(&mut self, outcome: Result<Outcome, CoreError>) {
        self.ready = ReadyState::Done;
        self.operation = None;
        match outcome {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.error = None;
            }
            Err(err) => {
                self.outcome = None;
                self.error = Some(err);
            }
        }
    }

    /// Re-arms the request for another operation (cursor iteration).
    pub(crate) fn rearm(&mut self, operation: Operation) {
        self.ready = ReadyState::Pending;
        self.outcome = None;
        self.error = None;
        self.operation = Some(operation);
    }

    /// Leaves the final state for the handles.
    pub(crate) fn retire(self) {
        *self.retired.lock() = Some(RequestSnapshot {
            outcome: self.outcome,
            error: self.error,
        });
    }
}

/// Handle to a request.
#[derive(Clone)]
pub struct Request {
    id: RequestId,
    transaction: Transaction,
    retired: Retired<RequestSnapshot>,
}

impl Request {
    /// Builds a handle for a request the engine still holds.
    pub(crate) fn lookup(engine: &Arc<Engine>, st: &EngineState, id: RequestId) -> CoreResult<Self> {
        let record = st
            .requests
            .get(&id)
            .ok_or_else(|| CoreError::invalid_state(format!("unknown request {id}")))?;
        Ok(Self {
            id,
            transaction: Transaction::lookup(engine, st, record.transaction)?,
            retired: Arc::clone(&record.retired),
        })
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        self.transaction.engine()
    }

    fn read<R>(
        &self,
        live: impl FnOnce(&RequestRecord) -> R,
        retired: impl FnOnce(&RequestSnapshot) -> R,
    ) -> Option<R> {
        let st = self.engine().state();
        match st.requests.get(&self.id) {
            Some(record) => Some(live(record)),
            None => self.retired.lock().as_ref().map(retired),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns whether the request has completed.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.read(|r| r.ready, |_| ReadyState::Done)
            .unwrap_or(ReadyState::Done)
    }

    /// Returns the result once the request succeeded.
    #[must_use]
    pub fn result(&self) -> Option<RequestResult> {
        let outcome = self
            .read(|r| r.outcome.clone(), |r| r.outcome.clone())
            .flatten();
        outcome.map(|o| o.into_result(self))
    }

    /// Returns the error once the request failed.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        self.read(|r| r.error.clone(), |r| r.error.clone())
            .flatten()
    }

    /// Returns the transaction the request belongs to.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        Some(self.transaction.clone())
    }

    /// Sets the success callback, replacing any previous one.
    pub fn on_success(
        &self,
        handler: impl FnMut(&SuccessEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(record) = self.engine().state().requests.get_mut(&self.id) {
            record.on_success = Some(Box::new(handler));
        }
        self
    }

    /// Sets the error callback, replacing any previous one.
    pub fn on_error(
        &self,
        handler: impl FnMut(&mut ErrorEvent) -> CallbackResult + Send + 'static,
    ) -> &Self {
        if let Some(record) = self.engine().state().requests.get_mut(&self.id) {
            record.on_error = Some(Box::new(handler));
        }
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").field("id", &self.id).finish()
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.engine(), other.engine()) && self.id == other.id
    }
}

impl Eq for Request {}
