//! Error types for the commit and reconciliation engine
//!
//! Directory failures are split into transient (the service is unreachable or
//! overloaded) and rejected (the service answered and refused). Only transient
//! failures are ever retried.

use thiserror::Error;

/// Failure reported by a [`DirectoryEffects`](crate::directory::DirectoryEffects) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// Network or service outage; the same call may succeed later.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The directory refused the request.
    #[error("directory rejected request: {0}")]
    Rejected(String),
}

impl DirectoryError {
    /// Create an unavailable (transient) error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Create a rejected (permanent) error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors surfaced by [`CfStore`](crate::CfStore) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfStoreError {
    /// A directory call failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The transaction does not identify its producer.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    /// A required directory property could not be created.
    #[error("failed to create directory property {property}: {source}")]
    SchemaBootstrap {
        /// Name of the property being created
        property: String,
        /// Underlying directory failure
        #[source]
        source: DirectoryError,
    },

    /// The configured commit retry ceiling was reached.
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Failure of the last attempt
        #[source]
        source: Box<CfStoreError>,
    },

    /// The engine has not been started.
    #[error("cfstore is not running")]
    NotRunning,

    /// The engine has been stopped and its worker is gone.
    #[error("cfstore worker has shut down")]
    EngineClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CfStoreError {
    /// Create a malformed transaction error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedTransaction(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Whether the retry driver should try the failed operation again.
    ///
    /// Schema bootstrap failures inherit the classification of the directory
    /// error that caused them.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Directory(e) => e.is_transient(),
            Self::SchemaBootstrap { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Result alias used throughout the crate.
pub type CfStoreResult<T> = Result<T, CfStoreError>;
