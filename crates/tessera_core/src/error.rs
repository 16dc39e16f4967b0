//! Error types for Tessera core.

use tessera_codec::CodecError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result returned by user callbacks.
///
/// Returning `Err` from a request callback is treated as the callback
/// failing: the owning transaction is aborted.
pub type CallbackResult = Result<(), CoreError>;

/// The named condition behind a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key or value does not meet structural or key path requirements.
    Data,
    /// Unique index or insert-only violation.
    Constraint,
    /// Key generator exhausted.
    ConstraintOverflow,
    /// Named store, index or database is absent.
    NotFound,
    /// Operation not allowed in the current state.
    InvalidState,
    /// Request issued against a transaction that is not active.
    TransactionInactive,
    /// Mutation attempted in a read-only transaction.
    ReadOnly,
    /// Open requested at a version lower than the current one.
    Version,
    /// Result discarded because the transaction aborted.
    Abort,
    /// Operation not supported for this object.
    InvalidAccess,
    /// Malformed key path.
    Syntax,
    /// Value cannot be cloned.
    DataClone,
    /// Argument of the wrong type or out of range.
    Type,
}

impl ErrorKind {
    /// Returns the conventional name of the condition.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Data => "DataError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::ConstraintOverflow => "ConstraintOverflowError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::TransactionInactive => "TransactionInactiveError",
            ErrorKind::ReadOnly => "ReadOnlyError",
            ErrorKind::Version => "VersionError",
            ErrorKind::Abort => "AbortError",
            ErrorKind::InvalidAccess => "InvalidAccessError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::DataClone => "DataCloneError",
            ErrorKind::Type => "TypeError",
        }
    }
}

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Key or value is invalid.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// A constraint was violated.
    #[error("constraint violated: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// The key generator reached its maximum.
    #[error("key generator exhausted")]
    ConstraintOverflow,

    /// A named object does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Why the operation is invalid.
        message: String,
    },

    /// The transaction is not active.
    #[error("transaction is not active")]
    TransactionInactive,

    /// The transaction is read-only.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Requested version is lower than the stored one.
    #[error("requested version {requested} is less than existing version {current}")]
    Version {
        /// Version passed to open.
        requested: u64,
        /// Version currently stored.
        current: u64,
    },

    /// The transaction was aborted.
    #[error("aborted: {message}")]
    Abort {
        /// Why the result was discarded.
        message: String,
    },

    /// Operation is not supported for this object.
    #[error("invalid access: {message}")]
    InvalidAccess {
        /// Description of the misuse.
        message: String,
    },

    /// Key path is malformed.
    #[error("invalid key path: {path}")]
    Syntax {
        /// The offending path.
        path: String,
    },

    /// Value could not be cloned.
    #[error("value cannot be cloned: {message}")]
    DataClone {
        /// Why cloning failed.
        message: String,
    },

    /// Argument has the wrong type or is out of range.
    #[error("type error: {message}")]
    Type {
        /// Description of the argument problem.
        message: String,
    },
}

impl CoreError {
    /// Returns the condition tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Data { .. } => ErrorKind::Data,
            CoreError::Constraint { .. } => ErrorKind::Constraint,
            CoreError::ConstraintOverflow => ErrorKind::ConstraintOverflow,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::TransactionInactive => ErrorKind::TransactionInactive,
            CoreError::ReadOnly => ErrorKind::ReadOnly,
            CoreError::Version { .. } => ErrorKind::Version,
            CoreError::Abort { .. } => ErrorKind::Abort,
            CoreError::InvalidAccess { .. } => ErrorKind::InvalidAccess,
            CoreError::Syntax { .. } => ErrorKind::Syntax,
            CoreError::DataClone { .. } => ErrorKind::DataClone,
            CoreError::Type { .. } => ErrorKind::Type,
        }
    }

    /// Returns the conventional name of the condition.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort {
            message: message.into(),
        }
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Creates a key path syntax error.
    pub fn syntax(path: impl Into<String>) -> Self {
        Self::Syntax { path: path.into() }
    }

    /// Creates a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidKey { message } => CoreError::Data { message },
            CodecError::DataClone { message } => CoreError::DataClone { message },
            CodecError::Detached => CoreError::DataClone {
                message: "binary buffer is detached".to_string(),
            },
        }
    }
}
