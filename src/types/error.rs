//! Error types for the credit ledger
//!
//! This module defines every error the ledger core and its command driver can
//! report. Variants carry the context needed to decide what the caller should
//! do next, and [`LedgerError::class`] folds them into three outcomes:
//!
//! - **Retryable**: nothing happened, the same request may be sent again
//!   (in-flight conflicts, aborted transactions)
//! - **Rejected**: the request will never succeed with this input
//!   (insufficient balance, malformed amounts, reused keys)
//! - **Fatal**: stored state cannot be trusted or the driver's own I/O
//!   failed; operators must investigate

use super::amount::Credits;
use super::balance::UserId;
use super::idempotency::{IdempotencyKey, IdempotencyStatus};
use thiserror::Error;

/// What the caller should do with a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing was persisted; retry after backoff
    Retryable,
    /// The request is invalid for the current state; do not retry unchanged
    Rejected,
    /// Data integrity or configuration problem; stop and investigate
    Fatal,
}

/// Main error type for the credit ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// A debit would drive the balance below zero
    ///
    /// Evaluated against the balance read while holding the user's lock, so
    /// `available` is the freshest committed value.
    #[error("Insufficient balance for user {user}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// User whose balance was checked
        user: UserId,
        /// Amount the debit asked for
        requested: Credits,
        /// Balance at the time of the check
        available: Credits,
    },

    /// Another request holding the same idempotency key is still running
    #[error("Request with idempotency key '{key}' is already in flight")]
    Conflict {
        /// The contended key
        key: IdempotencyKey,
    },

    /// The key was claimed by a request with a different user, direction or amount
    #[error("Idempotency key '{key}' was already used for a different request")]
    IdempotencyKeyReuse {
        /// The reused key
        key: IdempotencyKey,
    },

    /// Stored state contradicts itself (e.g. a completed key without its entry)
    #[error("Ledger inconsistency: {detail}")]
    LedgerInconsistency {
        /// Description of the contradiction
        detail: String,
    },

    /// The unit of work was rolled back before it could commit
    #[error("Transaction aborted: {reason}")]
    TransactionAborted {
        /// Why the commit did not happen
        reason: String,
    },

    /// Amount is malformed, too precise, out of range or not positive
    #[error("Invalid amount '{amount}'")]
    InvalidAmount {
        /// The rejected amount as text
        amount: String,
    },

    /// Checked arithmetic on a balance overflowed
    #[error("Arithmetic overflow in {operation} for user {user}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// User whose balance was being changed
        user: UserId,
    },

    /// Actor role string is not one of admin/system/provider/student
    #[error("Invalid actor role '{role}'")]
    InvalidActorRole {
        /// The rejected role string
        role: String,
    },

    /// An idempotency record was asked to move along a forbidden edge
    #[error("Invalid idempotency transition for key '{key}': {from} -> {to}")]
    InvalidTransition {
        /// Record key
        key: IdempotencyKey,
        /// Current status
        from: IdempotencyStatus,
        /// Requested status
        to: IdempotencyStatus,
    },

    /// No idempotency record exists for the key
    #[error("Unknown idempotency key '{key}'")]
    UnknownKey {
        /// The missing key
        key: IdempotencyKey,
    },

    /// The durable journal could not be written or read
    #[error("Journal error: {message}")]
    Journal {
        /// Description of the journal failure
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error occurred
    ///
    /// Recoverable in the command driver: the row is skipped.
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Classify the error for the caller
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Conflict { .. } | LedgerError::TransactionAborted { .. } => {
                ErrorClass::Retryable
            }
            LedgerError::InsufficientBalance { .. }
            | LedgerError::IdempotencyKeyReuse { .. }
            | LedgerError::InvalidAmount { .. }
            | LedgerError::ArithmeticOverflow { .. }
            | LedgerError::InvalidActorRole { .. }
            | LedgerError::UnknownKey { .. }
            | LedgerError::ParseError { .. } => ErrorClass::Rejected,
            LedgerError::LedgerInconsistency { .. }
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Journal { .. }
            | LedgerError::Config { .. }
            | LedgerError::IoError { .. }
            | LedgerError::FileNotFound { .. } => ErrorClass::Fatal,
        }
    }

    /// Whether the request can be sent again unchanged
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn insufficient_balance(user: &UserId, requested: Credits, available: Credits) -> Self {
        LedgerError::InsufficientBalance {
            user: user.clone(),
            requested,
            available,
        }
    }

    pub fn conflict(key: &IdempotencyKey) -> Self {
        LedgerError::Conflict { key: key.clone() }
    }

    pub fn key_reuse(key: &IdempotencyKey) -> Self {
        LedgerError::IdempotencyKeyReuse { key: key.clone() }
    }

    pub fn inconsistency(detail: impl Into<String>) -> Self {
        LedgerError::LedgerInconsistency {
            detail: detail.into(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        LedgerError::TransactionAborted {
            reason: reason.into(),
        }
    }

    pub fn invalid_amount(amount: &str) -> Self {
        LedgerError::InvalidAmount {
            amount: amount.to_string(),
        }
    }

    pub fn arithmetic_overflow(operation: &str, user: &UserId) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            user: user.clone(),
        }
    }

    pub fn invalid_transition(
        key: &IdempotencyKey,
        from: IdempotencyStatus,
        to: IdempotencyStatus,
    ) -> Self {
        LedgerError::InvalidTransition {
            key: key.clone(),
            from,
            to,
        }
    }

    pub fn unknown_key(key: &IdempotencyKey) -> Self {
        LedgerError::UnknownKey { key: key.clone() }
    }

    pub fn journal(message: impl Into<String>) -> Self {
        LedgerError::Journal {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        LedgerError::Config {
            message: message.into(),
        }
    }
}
