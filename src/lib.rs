//! Credit Ledger Library
//!
//! # Overview
//!
//! An idempotent, transactional credit ledger. Every balance change is an
//! immutable ledger entry, debits never take a balance below zero, and a
//! request retried with the same idempotency key is answered from the
//! original entry instead of being executed twice.
//!
//! # Architecture
//!
//! - [`types`] - Credits, users, entries, requests, idempotency records, errors
//! - [`core`] - The ledger engine:
//!   - [`core::coordinator`] - Runs each credit or debit as one unit of work
//!   - [`core::balance_store`] - Committed balances and per-user locks
//!   - [`core::ledger_log`] - Append-only history with paged queries
//!   - [`core::idempotency_register`] - Request keys and their lifecycle
//!   - [`core::journal`] / [`core::recovery`] - Durability and restart
//!   - [`core::housekeeping`] - Purging, stuck keys and audits
//! - [`config`] - TOML and environment configuration
//! - [`io`] - CSV command input, balance and ledger output
//! - [`strategy`] - Sync and async command drivers
//! - [`cli`] - Command-line arguments
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger::config::LedgerConfig;
//! use credit_ledger::core::TransactionCoordinator;
//! use credit_ledger::types::{ActorRole, Credits, MutationRequest};
//!
//! # async fn run() -> Result<(), credit_ledger::types::LedgerError> {
//! let ledger = TransactionCoordinator::in_memory(&LedgerConfig::default());
//! let request = MutationRequest::new("u1", Credits::from_minor(10_000), "topup", ActorRole::Admin)
//!     .with_idempotency_key("topup-42");
//!
//! let first = ledger.credit(request.clone()).await?;
//! let again = ledger.credit(request).await?;
//! assert_eq!(first.entry.id, again.entry.id);
//! assert!(again.is_replay());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod strategy;
pub mod types;

pub use config::LedgerConfig;
pub use core::{
    AuditReport, Housekeeper, Pagination, ReplayResolver, RequestStatus, TransactionCoordinator,
};
pub use types::{
    ActorRole, BalanceView, Credits, Direction, EntryId, IdempotencyKey, LedgerEntry, LedgerError,
    MutationRequest, Receipt, UserId,
};
