//! Core traits for the ledger's durable substrate
//!
//! This module defines the abstraction the transaction coordinator commits
//! through, so in-memory and file-backed persistence can be used
//! interchangeably.

use crate::types::{LedgerEntry, LedgerError};
use std::fmt::Debug;

/// Durable, append-only record of committed ledger entries
///
/// A successful `append` is the commit point of a unit of work: once it
/// returns `Ok`, the entry must survive a restart. Implementations are
/// called while the user's balance lock is held and must not call back into
/// the coordinator.
pub trait Journal: Send + Sync + Debug {
    /// Durably record one committed entry
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}
