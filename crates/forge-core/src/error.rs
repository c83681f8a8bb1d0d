//! Error types and result aliases for Forge.
//!
//! This module defines the shared error taxonomy used across all Forge
//! components. Variants are structured so callers can branch on the failure
//! class: "not found" is recoverable by a create-on-apply, a version conflict
//! is retried, an exhausted conflict budget or a transport failure is fatal
//! for the call that hit it.

use std::fmt;

/// The result type used throughout Forge.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Forge operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested resource was not found.
    #[error("not found: {kind}/{name}")]
    NotFound {
        /// The catalog name of the resource kind.
        kind: String,
        /// The resource name that was looked up.
        name: String,
    },

    /// An optimistic-concurrency update lost the race.
    #[error("version conflict: stored version is {current}")]
    Conflict {
        /// The resource version currently stored in the cluster.
        current: String,
    },

    /// The conflict retry budget was exhausted without a successful write.
    #[error("conflict retry budget exhausted after {attempts} attempts: {kind}/{name}")]
    ConflictExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The catalog name of the resource kind.
        kind: String,
        /// The resource name being written.
        name: String,
    },

    /// A transport or authentication failure talking to the cluster.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid input was provided (malformed request, illegal git URL shape).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition for the reconciliation was not met.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the failed precondition.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a not-found error for the given kind and name.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    /// Creates a transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a precondition error with the given message.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when this error is a not-found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when this error is a version conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
