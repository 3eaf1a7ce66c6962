//! Core ledger module
//!
//! This module contains the transaction engine components:
//! - `balance_store` - Per-user balances and row locks
//! - `ledger_log` - Append-only entry history with lazy queries
//! - `idempotency_register` - Request keys and their lifecycle
//! - `transaction` - Unit of work tying one mutation together
//! - `coordinator` - The state machine every credit and debit runs through
//! - `replay` - Read path for completed requests
//! - `traits` / `journal` - Durable commit point
//! - `recovery` - Rebuilding state from the journal
//! - `housekeeping` - Purging, stale key reports and audits

pub mod balance_store;
pub mod coordinator;
pub mod housekeeping;
pub mod idempotency_register;
pub mod journal;
pub mod ledger_log;
pub mod recovery;
pub mod replay;
pub mod traits;
pub mod transaction;

pub use balance_store::{BalanceLock, BalanceStore};
pub use coordinator::{CoordinatorState, TransactionCoordinator};
pub use housekeeping::{AuditReport, AuditViolation, Housekeeper, ViolationKind};
pub use idempotency_register::{ClaimOutcome, ClaimTicket, IdempotencyRegister};
pub use journal::{FileJournal, NullJournal};
pub use ledger_log::{LedgerCursor, LedgerLog, LedgerQuery, Pagination};
pub use recovery::RecoveryStats;
pub use replay::{ReplayResolver, RequestStatus};
pub use traits::Journal;
pub use transaction::UnitOfWork;
