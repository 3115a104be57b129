//! Error types for the numbering engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Only four kinds ever reach a caller of the engine in normal operation:
//! `IneligibleRecord`, `LockTimeout`, `StorageConflict` and `Configuration`.
//! The remaining kinds are raised by collaborators and either converted at the
//! lock/transaction boundary or propagated unchanged.

use std::fmt;
use thiserror::Error;

/// Result type alias for numbering operations
pub type NumberingResult<T> = std::result::Result<T, NumberingError>;

/// Why a record was refused a number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IneligibleReason {
    /// The record does not exist
    Missing,
    /// The record's type is neither a bind type nor a subtype of one
    TypeNotBound,
    /// The record's type is on the ignore list
    TypeIgnored,
    /// The record carries a trait on the ignore list
    TraitIgnored,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IneligibleReason::Missing => "record does not exist",
            IneligibleReason::TypeNotBound => "record type is not bound",
            IneligibleReason::TypeIgnored => "record type is ignored",
            IneligibleReason::TraitIgnored => "record has an ignored trait",
        };
        f.write_str(text)
    }
}

/// Error types for the numbering engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NumberingError {
    /// The record may not receive a number. No counter was touched.
    #[error("get next number is not allowed: {reason}")]
    IneligibleRecord {
        /// The first failing eligibility check
        reason: IneligibleReason,
    },

    /// The counter lock could not be acquired within the retry budget.
    /// No storage mutation occurred; the caller may retry.
    #[error("timed out acquiring lock {name} after {attempts} attempts")]
    LockTimeout {
        /// Lock name
        name: String,
        /// Number of acquisition attempts made
        attempts: u32,
    },

    /// Transaction retries were exhausted
    #[error("storage conflict after {attempts} attempts: {message}")]
    StorageConflict {
        /// Number of attempts made, including the first
        attempts: usize,
        /// Last conflict observed
        message: String,
    },

    /// Required collaborator or field missing at construction time
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Optimistic concurrency conflict detected at commit.
    /// Only observed inside a retrying executor.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A referenced record, attribute or lock does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting identity may not perform the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The record is locked by another actor
    #[error("record locked: {0}")]
    Locked(String),

    /// Invalid argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Backing store fault or inconsistent stored data
    #[error("storage error: {0}")]
    Storage(String),
}

impl NumberingError {
    /// Create an ineligible-record error
    pub fn ineligible(reason: IneligibleReason) -> Self {
        NumberingError::IneligibleRecord { reason }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        NumberingError::Configuration(message.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        NumberingError::Conflict(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        NumberingError::NotFound(message.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        NumberingError::InvalidInput(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        NumberingError::Storage(message.into())
    }

    /// Whether this is an optimistic conflict that a transaction retry can resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, NumberingError::Conflict(_))
    }

    /// Whether the caller may retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NumberingError::LockTimeout { .. } | NumberingError::Conflict(_)
        )
    }

    /// Whether the error means "do not allocate" rather than a failure
    pub fn is_ineligible(&self) -> bool {
        matches!(self, NumberingError::IneligibleRecord { .. })
    }
}
