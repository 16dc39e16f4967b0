//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting or cloning values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value is not a legal key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the value was rejected.
        message: String,
    },

    /// The value cannot be cloned.
    #[error("value cannot be cloned: {message}")]
    DataClone {
        /// Why the value could not be cloned.
        message: String,
    },

    /// A binary buffer was used after being detached.
    #[error("binary buffer is detached")]
    Detached,
}

impl CodecError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a data clone error.
    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::DataClone {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = CodecError::invalid_key("NaN");
        assert_eq!(err.to_string(), "invalid key: NaN");

        let err = CodecError::Detached;
        assert_eq!(err.to_string(), "binary buffer is detached");
    }
}
