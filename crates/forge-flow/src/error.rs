//! Error types for the reconciliation domain.

/// The result type used throughout forge-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during intent reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cluster access operation failed.
    #[error(transparent)]
    Cluster(#[from] forge_core::Error),

    /// The intent carried an illegal git URL.
    #[error("illegal git url ({url})")]
    IllegalGitUrl {
        /// The offending URL.
        url: String,
    },

    /// A rendered template did not produce a well-formed object.
    #[error("template render failed: {message}")]
    Template {
        /// Description of the render failure.
        message: String,
    },

    /// A reconciliation precondition was not met; the event is dropped and
    /// the next event for the same object retries.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the failed precondition.
        message: String,
    },

    /// The supervisor was used outside its lifecycle contract.
    #[error("supervisor misuse: {message}")]
    Supervisor {
        /// Description of the contract violation.
        message: String,
    },

    /// Delivering a callback to the configured sink failed.
    #[error("callback delivery failed: {message}")]
    Callback {
        /// Description of the delivery failure.
        message: String,
    },
}

impl Error {
    /// Creates a template error with the given message.
    #[must_use]
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Creates a precondition error with the given message.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates a callback error with the given message.
    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }

    /// Returns true when the underlying failure is a not-found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Cluster(inner) if inner.is_not_found())
    }
}
