//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `amount`: fixed-point credit amounts
//! - `balance`: user identifiers and balance rows
//! - `entry`: immutable ledger entries
//! - `idempotency`: idempotency keys and records
//! - `request`: mutation requests and receipts
//! - `error`: error types for the ledger

pub mod amount;
pub mod balance;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod request;

pub use amount::{Credits, MINOR_UNIT_SCALE};
pub use balance::{BalanceView, UserBalance, UserId};
pub use entry::{ActorRole, EntryId, LedgerEntry};
pub use error::{ErrorClass, LedgerError};
pub use idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyStatus};
pub use request::{
    Direction, Disposition, LedgerCommand, MutationRequest, Receipt, RequestFingerprint,
};
