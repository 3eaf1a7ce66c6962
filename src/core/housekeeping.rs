//! Housekeeping and audit
//!
//! Everything the hot path deliberately leaves alone: purging expired
//! idempotency records, reporting and abandoning stuck `PENDING` keys, and
//! auditing the ledger against the balances it explains.

use super::balance_store::BalanceStore;
use super::idempotency_register::IdempotencyRegister;
use super::ledger_log::LedgerLog;
use crate::types::{
    Credits, IdempotencyKey, IdempotencyRecord, LedgerEntry, LedgerError, UserId,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Kind of invariant an audit found broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Sum of the user's deltas differs from the balance
    SumMismatch,
    /// Committed balance is below zero
    NegativeBalance,
    /// Last entry's `balance_after` differs from the balance
    SnapshotMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::SumMismatch => f.write_str("sum mismatch"),
            ViolationKind::NegativeBalance => f.write_str("negative balance"),
            ViolationKind::SnapshotMismatch => f.write_str("snapshot mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditViolation {
    pub user_id: UserId,
    pub kind: ViolationKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub users_checked: usize,
    pub violations: Vec<AuditViolation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Operator-facing maintenance handle
#[derive(Debug, Clone)]
pub struct Housekeeper {
    balances: Arc<BalanceStore>,
    log: Arc<LedgerLog>,
    register: Arc<IdempotencyRegister>,
}

impl Housekeeper {
    pub fn new(
        balances: Arc<BalanceStore>,
        log: Arc<LedgerLog>,
        register: Arc<IdempotencyRegister>,
    ) -> Self {
        Housekeeper {
            balances,
            log,
            register,
        }
    }

    /// Remove terminal idempotency records that expired at or before `now`
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let purged = self.register.purge_expired(now);
        if purged > 0 {
            info!(purged, "purged expired idempotency records");
        }
        purged
    }

    /// List `PENDING` records older than `older_than`; changes nothing
    pub fn stale_pending(&self, now: DateTime<Utc>, older_than: Duration) -> Vec<IdempotencyRecord> {
        let stale = self.register.stale_pending(now, older_than);
        for record in &stale {
            warn!(
                key = %record.key,
                user = %record.fingerprint.user_id,
                created_at = %record.created_at,
                "idempotency key stuck in PENDING"
            );
        }
        stale
    }

    /// Fail a stuck `PENDING` key so clients can retry it
    ///
    /// Only safe once the operator knows the original request is not running.
    pub fn abandon(&self, key: &IdempotencyKey) -> Result<(), LedgerError> {
        self.register.fail(key)?;
        warn!(key = %key, "idempotency key abandoned by operator");
        Ok(())
    }

    /// Check every user's balance against their ledger
    ///
    /// Each user is locked while checked, so the balance and history are
    /// compared at a single point in time. Users are checked one at a time.
    pub async fn audit(&self) -> AuditReport {
        let users: BTreeSet<UserId> = self
            .balances
            .all_balances()
            .into_iter()
            .map(|row| row.user_id)
            .chain(self.log.users())
            .collect();

        let mut report = AuditReport::default();

        for user_id in users {
            let lock = self.balances.lock_for_update(&user_id).await;
            let balance = lock.current();
            let history = self.log.entries_for(&user_id);
            drop(lock);

            report.users_checked += 1;
            report
                .violations
                .extend(check_user(&user_id, balance, &history));
        }

        for violation in &report.violations {
            error!(
                user = %violation.user_id,
                kind = %violation.kind,
                detail = %violation.detail,
                "ledger audit violation"
            );
        }
        info!(
            users = report.users_checked,
            violations = report.violations.len(),
            "ledger audit finished"
        );

        report
    }
}

fn check_user(
    user_id: &UserId,
    balance: Credits,
    history: &[LedgerEntry],
) -> Vec<AuditViolation> {
    let mut violations = Vec::new();
    let violation = |kind, detail: String| AuditViolation {
        user_id: user_id.clone(),
        kind,
        detail,
    };

    if balance.is_negative() {
        violations.push(violation(
            ViolationKind::NegativeBalance,
            format!("balance is {}", balance),
        ));
    }

    let sum = history
        .iter()
        .try_fold(Credits::ZERO, |acc, entry| acc.checked_add(entry.delta));
    match sum {
        Some(sum) if sum == balance => {}
        Some(sum) => violations.push(violation(
            ViolationKind::SumMismatch,
            format!("deltas sum to {}, balance is {}", sum, balance),
        )),
        None => violations.push(violation(
            ViolationKind::SumMismatch,
            "sum of deltas overflows".to_string(),
        )),
    }

    if let Some(last) = history.last() {
        if last.balance_after != balance {
            violations.push(violation(
                ViolationKind::SnapshotMismatch,
                format!(
                    "entry {} records {}, balance is {}",
                    last.id, last.balance_after, balance
                ),
            ));
        }
    }

    violations
}
