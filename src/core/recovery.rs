//! Rebuild in-memory state from journaled entries
//!
//! Every entry is checked against the ones before it. Recovery refuses to
//! start on the first contradiction instead of serving balances it cannot
//! vouch for.

use super::balance_store::BalanceStore;
use super::idempotency_register::IdempotencyRegister;
use super::ledger_log::LedgerLog;
use crate::types::{
    Credits, Direction, LedgerEntry, LedgerError, RequestFingerprint, UserBalance, UserId,
};
use std::collections::HashMap;
use tracing::info;

/// Counts of what recovery restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub entries: usize,
    pub users: usize,
    pub idempotency_keys: usize,
}

/// Replay `entries` (in journal order) into empty stores
///
/// # Errors
///
/// `LedgerInconsistency` if an entry breaks sequence continuity, reuses an
/// id or key, has a zero delta, or carries a snapshot that does not equal
/// the previous balance plus its delta or is negative.
pub(crate) fn rebuild(
    balances: &BalanceStore,
    log: &LedgerLog,
    register: &IdempotencyRegister,
    entries: Vec<LedgerEntry>,
) -> Result<RecoveryStats, LedgerError> {
    let mut rows: HashMap<UserId, UserBalance> = HashMap::new();
    let mut stats = RecoveryStats::default();

    for entry in entries {
        let previous = rows
            .get(&entry.user_id)
            .map(|row| row.balance)
            .unwrap_or(Credits::ZERO);

        check_snapshot(&entry, previous)?;

        if let Some(key) = entry.idempotency_key.clone() {
            register.restore_completed(key, fingerprint_of(&entry)?, entry.id, entry.created_at)?;
            stats.idempotency_keys += 1;
        }

        rows.insert(
            entry.user_id.clone(),
            UserBalance {
                user_id: entry.user_id.clone(),
                balance: entry.balance_after,
                updated_at: entry.created_at,
            },
        );

        log.restore(entry)?;
        stats.entries += 1;
    }

    stats.users = rows.len();
    for row in rows.into_values() {
        balances.restore(row);
    }

    info!(
        entries = stats.entries,
        users = stats.users,
        keys = stats.idempotency_keys,
        "ledger state recovered"
    );

    Ok(stats)
}

fn check_snapshot(entry: &LedgerEntry, previous: Credits) -> Result<(), LedgerError> {
    if entry.delta == Credits::ZERO {
        return Err(LedgerError::inconsistency(format!(
            "entry {} has a zero delta",
            entry.id
        )));
    }

    let expected = previous.checked_add(entry.delta).ok_or_else(|| {
        LedgerError::inconsistency(format!("entry {} overflows the running balance", entry.id))
    })?;

    if expected != entry.balance_after {
        return Err(LedgerError::inconsistency(format!(
            "entry {} for user {}: {} + {} != recorded {}",
            entry.id, entry.user_id, previous, entry.delta, entry.balance_after
        )));
    }

    if entry.balance_after.is_negative() {
        return Err(LedgerError::inconsistency(format!(
            "entry {} leaves user {} at negative balance {}",
            entry.id, entry.user_id, entry.balance_after
        )));
    }

    Ok(())
}

/// Reconstruct the fingerprint of the request that produced `entry`
fn fingerprint_of(entry: &LedgerEntry) -> Result<RequestFingerprint, LedgerError> {
    let (direction, amount) = if entry.delta.is_positive() {
        (Direction::Credit, entry.delta)
    } else {
        let amount = entry.delta.checked_neg().ok_or_else(|| {
            LedgerError::inconsistency(format!("entry {} has an unrepresentable delta", entry.id))
        })?;
        (Direction::Debit, amount)
    };

    Ok(RequestFingerprint {
        user_id: entry.user_id.clone(),
        direction,
        amount,
    })
}
