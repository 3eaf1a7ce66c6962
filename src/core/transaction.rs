//! Unit of work for a single balance mutation
//!
//! A `UnitOfWork` owns everything one mutation touches until it commits:
//! the user's balance lock, the staged ledger entry and, for idempotent
//! requests, the claim on the key. Nothing it stages is visible to other
//! callers before [`UnitOfWork::commit`] succeeds.
//!
//! Dropping a unit of work at any point rolls it back: the staged balance
//! and entry are discarded, the lock is released and the claim fails its key.

use super::balance_store::{BalanceLock, BalanceStore};
use super::idempotency_register::{ClaimTicket, IdempotencyRegister};
use super::ledger_log::LedgerLog;
use super::traits::Journal;
use crate::types::{ActorRole, Credits, IdempotencyKey, LedgerEntry, LedgerError, UserId};
use chrono::Utc;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug)]
pub struct UnitOfWork<'a> {
    balances: &'a BalanceStore,
    log: &'a LedgerLog,
    register: &'a IdempotencyRegister,
    lock: BalanceLock,
    claim: Option<ClaimTicket>,
    entry: Option<LedgerEntry>,
}

impl<'a> UnitOfWork<'a> {
    /// Lock `user_id` and start a unit of work
    ///
    /// This is where concurrent mutations of the same user queue up.
    pub async fn begin(
        balances: &'a BalanceStore,
        log: &'a LedgerLog,
        register: &'a IdempotencyRegister,
        user_id: &UserId,
        claim: Option<ClaimTicket>,
    ) -> UnitOfWork<'a> {
        let lock = balances.lock_for_update(user_id).await;

        UnitOfWork {
            balances,
            log,
            register,
            lock,
            claim,
            entry: None,
        }
    }

    /// Balance as seen inside this unit of work
    pub fn balance(&self) -> Credits {
        self.lock.current()
    }

    pub fn apply_delta(&mut self, delta: Credits) -> Result<Credits, LedgerError> {
        self.balances.apply_delta(&mut self.lock, delta)
    }

    /// Stage the ledger entry describing the applied delta
    pub fn append_entry(
        &mut self,
        delta: Credits,
        purpose: &str,
        actor_role: ActorRole,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<&LedgerEntry, LedgerError> {
        if self.entry.is_some() {
            return Err(LedgerError::aborted(
                "a unit of work can stage only one ledger entry",
            ));
        }

        let entry = self.log.append(
            &self.lock,
            delta,
            purpose,
            actor_role,
            idempotency_key,
            Utc::now(),
        )?;

        Ok(&*self.entry.insert(entry))
    }

    /// Commit the unit of work
    ///
    /// The journal append is the commit point. When a key was claimed, the
    /// key is marked as committing first and moves to `COMPLETED` once the
    /// entry and balance are published. The user's lock is held throughout.
    ///
    /// The append may block on disk. On a multi-thread runtime it runs in
    /// [`tokio::task::block_in_place`] so the worker's other tasks move on.
    ///
    /// # Errors
    ///
    /// - `TransactionAborted` if nothing was staged, the journal rejected
    ///   the entry or the claim was lost; nothing is published
    /// - `LedgerInconsistency` if the staged entry and balance disagree
    pub fn commit(self, journal: &dyn Journal) -> Result<LedgerEntry, LedgerError> {
        let UnitOfWork {
            balances,
            log,
            register,
            lock,
            claim,
            entry,
        } = self;

        let entry = entry.ok_or_else(|| LedgerError::aborted("no ledger entry was staged"))?;

        if lock.staged() != Some(entry.balance_after) {
            return Err(LedgerError::inconsistency(format!(
                "entry {} snapshot {} does not match staged balance {:?}",
                entry.id,
                entry.balance_after,
                lock.staged()
            )));
        }

        let entry_id = entry.id;
        let publish = move || -> Result<LedgerEntry, LedgerError> {
            append_blocking(journal, &entry)
                .map_err(|e| LedgerError::aborted(format!("journal append failed: {}", e)))?;

            log.publish(entry.clone());
            balances.commit(lock, entry.created_at);
            Ok(entry)
        };

        match claim {
            Some(ticket) => {
                let committed = register.complete(&ticket, entry_id, publish)?;
                ticket.disarm();
                Ok(committed)
            }
            None => publish(),
        }
    }
}

fn append_blocking(journal: &dyn Journal, entry: &LedgerEntry) -> Result<(), LedgerError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| journal.append(entry))
        }
        _ => journal.append(entry),
    }
}
