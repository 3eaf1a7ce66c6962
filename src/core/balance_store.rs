//! Per-user balance storage with transaction-scoped row locks
//!
//! This module provides the `BalanceStore` struct, which holds the committed
//! balance of every user and hands out exclusive, per-user locks for the
//! duration of one unit of work.
//!
//! # Design
//!
//! Two concurrent maps are kept side by side:
//!
//! - `gates`: one async mutex per user. Holding its guard is the row lock.
//!   Waiters on one user never block operations on any other user.
//! - `committed`: the last committed balance row per user. Readers take a
//!   short shard read lock and never wait on an in-flight writer.
//!
//! A writer acquires the gate, reads the freshest committed value, stages its
//! change inside the [`BalanceLock`] and publishes it on commit. Dropping the
//! lock without committing discards the staged value.

use crate::types::{BalanceView, Credits, LedgerError, UserBalance, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive lock on one user's balance row
///
/// Only [`BalanceStore::lock_for_update`] can create one, so holding a
/// `BalanceLock` proves the row is locked for the current unit of work.
#[derive(Debug)]
pub struct BalanceLock {
    user_id: UserId,

    /// Committed balance observed right after the lock was acquired
    fresh: Credits,

    /// Balance after the delta applied in this unit of work, if any
    staged: Option<Credits>,

    _guard: OwnedMutexGuard<()>,
}

impl BalanceLock {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Balance as seen by this unit of work (staged value if present)
    pub fn current(&self) -> Credits {
        self.staged.unwrap_or(self.fresh)
    }

    pub fn staged(&self) -> Option<Credits> {
        self.staged
    }
}

/// Thread-safe store of committed per-user balances
#[derive(Debug, Default)]
pub struct BalanceStore {
    gates: DashMap<UserId, Arc<Mutex<()>>>,
    committed: DashMap<UserId, UserBalance>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive row lock for `user_id`
    ///
    /// Waits until any other holder for the same user releases its lock.
    /// This is the only place a mutation ever waits; no fairness between
    /// waiters is promised.
    pub async fn lock_for_update(&self, user_id: &UserId) -> BalanceLock {
        // Clone the gate out so no map shard stays locked across the await.
        let gate = Arc::clone(
            self.gates
                .entry(user_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = gate.lock_owned().await;

        let fresh = self
            .committed
            .get(user_id)
            .map(|row| row.balance)
            .unwrap_or(Credits::ZERO);

        BalanceLock {
            user_id: user_id.clone(),
            fresh,
            staged: None,
            _guard: guard,
        }
    }

    /// Lock-free read of the last committed balance
    ///
    /// May lag behind a writer that has not committed yet.
    pub fn read_balance(&self, user_id: &UserId) -> BalanceView {
        self.committed
            .get(user_id)
            .map(|row| BalanceView::from(row.value().clone()))
            .unwrap_or_else(|| BalanceView::empty(user_id.clone()))
    }

    /// Stage `delta` on a locked row
    ///
    /// Overdraft protection is evaluated against the value read under the
    /// lock, so two debits for the same user can never both see the same
    /// starting balance.
    ///
    /// # Errors
    ///
    /// - `InsufficientBalance` if the result would be negative
    /// - `ArithmeticOverflow` if the result does not fit
    pub fn apply_delta(&self, lock: &mut BalanceLock, delta: Credits) -> Result<Credits, LedgerError> {
        let available = lock.current();

        let next = available
            .checked_add(delta)
            .ok_or_else(|| LedgerError::arithmetic_overflow("apply_delta", &lock.user_id))?;

        if next.is_negative() {
            let requested = delta
                .checked_neg()
                .ok_or_else(|| LedgerError::arithmetic_overflow("apply_delta", &lock.user_id))?;
            return Err(LedgerError::insufficient_balance(
                &lock.user_id,
                requested,
                available,
            ));
        }

        lock.staged = Some(next);
        Ok(next)
    }

    /// Publish the staged value and release the lock
    pub(crate) fn commit(&self, lock: BalanceLock, at: DateTime<Utc>) {
        if let Some(balance) = lock.staged {
            self.committed.insert(
                lock.user_id.clone(),
                UserBalance {
                    user_id: lock.user_id.clone(),
                    balance,
                    updated_at: at,
                },
            );
        }
        // Guard drops with `lock`, after the new value is visible.
    }

    /// Install a balance row rebuilt from the journal
    pub(crate) fn restore(&self, row: UserBalance) {
        self.committed.insert(row.user_id.clone(), row);
    }

    /// Snapshot of all committed balance rows, sorted by user
    pub fn all_balances(&self) -> Vec<UserBalance> {
        let mut rows: Vec<UserBalance> = self
            .committed
            .iter()
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        rows
    }
}
