//! Transaction coordinator
//!
//! The entry point for every balance mutation. A request runs through a
//! fixed sequence of states:
//!
//! ```text
//! START -> KEY_CLAIMED -> BALANCE_LOCKED -> DELTA_APPLIED -> ENTRY_LOGGED
//!       -> KEY_COMPLETED -> COMMITTED
//! ```
//!
//! with `REPLAYED` (a completed key answered from the ledger) and
//! `ROLLED_BACK` (any failure, nothing persisted) as the other terminal
//! states. Each transition is traced at debug level.
//!
//! # Architecture
//!
//! ```text
//! TransactionCoordinator
//!     ├── Arc<BalanceStore>          (per-user balances and row locks)
//!     ├── Arc<LedgerLog>             (append-only history)
//!     ├── Arc<IdempotencyRegister>   (request keys)
//!     └── Arc<dyn Journal>           (commit point)
//! ```
//!
//! The coordinator is cheap to clone and can be shared across tasks.

use super::balance_store::BalanceStore;
use super::housekeeping::Housekeeper;
use super::idempotency_register::{ClaimOutcome, IdempotencyRegister};
use super::journal::{FileJournal, NullJournal};
use super::ledger_log::{LedgerLog, LedgerQuery, Pagination};
use super::recovery::{self, RecoveryStats};
use super::replay::ReplayResolver;
use super::traits::Journal;
use super::transaction::UnitOfWork;
use crate::config::LedgerConfig;
use crate::types::{
    BalanceView, Direction, Disposition, EntryId, LedgerEntry, LedgerError, MutationRequest,
    Receipt, UserId,
};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Position of a request in the coordinator's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Start,
    KeyClaimed,
    BalanceLocked,
    DeltaApplied,
    EntryLogged,
    KeyCompleted,
    Committed,
    RolledBack,
    Replayed,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoordinatorState::Start => "START",
            CoordinatorState::KeyClaimed => "KEY_CLAIMED",
            CoordinatorState::BalanceLocked => "BALANCE_LOCKED",
            CoordinatorState::DeltaApplied => "DELTA_APPLIED",
            CoordinatorState::EntryLogged => "ENTRY_LOGGED",
            CoordinatorState::KeyCompleted => "KEY_COMPLETED",
            CoordinatorState::Committed => "COMMITTED",
            CoordinatorState::RolledBack => "ROLLED_BACK",
            CoordinatorState::Replayed => "REPLAYED",
        };
        f.write_str(label)
    }
}

fn advance(state: &mut CoordinatorState, next: CoordinatorState) {
    debug!(from = %state, to = %next, "transition");
    *state = next;
}

/// Orchestrates credits and debits as atomic units of work
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    balances: Arc<BalanceStore>,
    log: Arc<LedgerLog>,
    register: Arc<IdempotencyRegister>,
    journal: Arc<dyn Journal>,
}

impl TransactionCoordinator {
    /// In-memory coordinator; nothing survives the process
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::with_journal(config, Arc::new(NullJournal))
    }

    /// Empty coordinator committing through `journal`
    pub fn with_journal(config: &LedgerConfig, journal: Arc<dyn Journal>) -> Self {
        TransactionCoordinator {
            balances: Arc::new(BalanceStore::new()),
            log: Arc::new(LedgerLog::new()),
            register: Arc::new(IdempotencyRegister::new(config.idempotency_ttl())),
            journal,
        }
    }

    /// Build a coordinator for `config`, recovering from its journal if set
    ///
    /// # Errors
    ///
    /// - `Journal` if the journal cannot be opened
    /// - `LedgerInconsistency` if the journaled history does not add up
    pub fn open(config: &LedgerConfig) -> Result<(Self, RecoveryStats), LedgerError> {
        let Some(path) = &config.journal_path else {
            info!("no journal configured, ledger state is in memory only");
            return Ok((Self::in_memory(config), RecoveryStats::default()));
        };

        let (journal, entries) = FileJournal::open(path)?;
        let coordinator = Self::with_journal(config, Arc::new(journal));
        let stats = recovery::rebuild(
            &coordinator.balances,
            &coordinator.log,
            &coordinator.register,
            entries,
        )?;

        Ok((coordinator, stats))
    }

    /// Increase the user's balance by `request.amount`
    pub async fn credit(&self, request: MutationRequest) -> Result<Receipt, LedgerError> {
        self.execute(Direction::Credit, request).await
    }

    /// Decrease the user's balance by `request.amount`
    ///
    /// Fails with `InsufficientBalance` rather than going below zero.
    pub async fn debit(&self, request: MutationRequest) -> Result<Receipt, LedgerError> {
        self.execute(Direction::Debit, request).await
    }

    /// Run one mutation through the state machine
    ///
    /// A request with a key that already completed is answered with the
    /// original entry and its original snapshot. A key that is still in
    /// flight yields `Conflict` immediately; the coordinator never waits on
    /// another request's key. Dropping the returned future before it
    /// resolves rolls the mutation back.
    #[instrument(
        name = "ledger_mutation",
        skip(self, request),
        fields(user = %request.user_id, amount = %request.amount, key = ?request.idempotency_key)
    )]
    pub async fn execute(
        &self,
        direction: Direction,
        request: MutationRequest,
    ) -> Result<Receipt, LedgerError> {
        let mut state = CoordinatorState::Start;

        match self.run(direction, &request, &mut state).await {
            Ok(receipt) => Ok(receipt),
            Err(error) => {
                debug!(from = %state, to = %CoordinatorState::RolledBack, error = %error, "transition");
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        direction: Direction,
        request: &MutationRequest,
        state: &mut CoordinatorState,
    ) -> Result<Receipt, LedgerError> {
        if !request.amount.is_positive() {
            return Err(LedgerError::invalid_amount(&request.amount.to_string()));
        }

        let delta = match direction {
            Direction::Credit => request.amount,
            Direction::Debit => request.amount.checked_neg().ok_or_else(|| {
                LedgerError::arithmetic_overflow("debit", &request.user_id)
            })?,
        };

        let claim = match &request.idempotency_key {
            None => None,
            Some(key) => {
                match self
                    .register
                    .claim(key, request.fingerprint(direction), Utc::now())?
                {
                    ClaimOutcome::Claimed(ticket) => {
                        advance(state, CoordinatorState::KeyClaimed);
                        Some(ticket)
                    }
                    ClaimOutcome::AlreadyCompleted(entry_id) => {
                        let entry = self.replay_resolver().load_entry(key, entry_id)?;
                        advance(state, CoordinatorState::Replayed);
                        return Ok(Receipt {
                            entry,
                            disposition: Disposition::Replayed,
                        });
                    }
                    ClaimOutcome::AlreadyInFlight => return Err(LedgerError::conflict(key)),
                }
            }
        };
        let keyed = claim.is_some();

        let mut unit = UnitOfWork::begin(
            &self.balances,
            &self.log,
            &self.register,
            &request.user_id,
            claim,
        )
        .await;
        advance(state, CoordinatorState::BalanceLocked);

        unit.apply_delta(delta)?;
        advance(state, CoordinatorState::DeltaApplied);

        unit.append_entry(
            delta,
            &request.purpose,
            request.actor_role,
            request.idempotency_key.clone(),
        )?;
        advance(state, CoordinatorState::EntryLogged);

        let entry = unit.commit(self.journal.as_ref())?;
        if keyed {
            advance(state, CoordinatorState::KeyCompleted);
        }
        advance(state, CoordinatorState::Committed);

        Ok(Receipt {
            entry,
            disposition: Disposition::Committed,
        })
    }

    /// Last committed balance; never waits on writers
    pub fn get_balance(&self, user_id: &UserId) -> BalanceView {
        self.balances.read_balance(user_id)
    }

    /// Lazy, creation-ordered view of a user's ledger
    pub fn get_ledger(&self, user_id: &UserId, pagination: Pagination) -> LedgerQuery<'_> {
        self.log.query(user_id, pagination)
    }

    /// Look up one committed entry
    pub fn get_entry(&self, id: &EntryId) -> Option<LedgerEntry> {
        self.log.get(id)
    }

    /// Sorted snapshot of every user's balance
    pub fn balances(&self) -> Vec<BalanceView> {
        self.balances
            .all_balances()
            .into_iter()
            .map(BalanceView::from)
            .collect()
    }

    /// Total committed entries across all users
    pub fn entry_count(&self) -> usize {
        self.log.len()
    }

    /// Users with at least one committed entry, sorted
    pub fn users(&self) -> Vec<UserId> {
        self.log.users()
    }

    pub fn replay_resolver(&self) -> ReplayResolver {
        ReplayResolver::new(Arc::clone(&self.register), Arc::clone(&self.log))
    }

    pub fn housekeeper(&self) -> Housekeeper {
        Housekeeper::new(
            Arc::clone(&self.balances),
            Arc::clone(&self.log),
            Arc::clone(&self.register),
        )
    }
}
