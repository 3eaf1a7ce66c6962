//! Replay resolver
//!
//! Read-only path answering "what happened to the request with this key?".
//! A completed request is answered with the exact entry it produced,
//! including the balance snapshot taken at its commit. The balance store is
//! never consulted.

use super::idempotency_register::IdempotencyRegister;
use super::ledger_log::LedgerLog;
use crate::types::{EntryId, IdempotencyKey, IdempotencyStatus, LedgerEntry, LedgerError};
use std::sync::Arc;

/// What is known about an idempotency key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request committed this entry
    Completed(LedgerEntry),
    /// A request holding the key has not finished yet
    InFlight,
    /// The last attempt rolled back; the key can be claimed again
    Failed,
    /// No record exists (never seen, or already purged)
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ReplayResolver {
    register: Arc<IdempotencyRegister>,
    log: Arc<LedgerLog>,
}

impl ReplayResolver {
    pub fn new(register: Arc<IdempotencyRegister>, log: Arc<LedgerLog>) -> Self {
        ReplayResolver { register, log }
    }

    /// Resolve the state of `key`
    ///
    /// # Errors
    ///
    /// `LedgerInconsistency` if the key is `COMPLETED` but its entry cannot
    /// be loaded. Such a key is never reported as unknown.
    pub fn resolve(&self, key: &IdempotencyKey) -> Result<RequestStatus, LedgerError> {
        let Some(record) = self.register.get(key) else {
            return Ok(RequestStatus::Unknown);
        };

        match record.status {
            IdempotencyStatus::Pending => Ok(RequestStatus::InFlight),
            IdempotencyStatus::Failed => Ok(RequestStatus::Failed),
            IdempotencyStatus::Completed => {
                let entry_id = record.result_entry_id.ok_or_else(|| {
                    LedgerError::inconsistency(format!(
                        "key '{}' is COMPLETED without a result entry",
                        key
                    ))
                })?;
                self.load_entry(key, entry_id).map(RequestStatus::Completed)
            }
        }
    }

    /// Load the entry a completed key points at
    pub(crate) fn load_entry(
        &self,
        key: &IdempotencyKey,
        entry_id: EntryId,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.log.get(&entry_id).ok_or_else(|| {
            LedgerError::inconsistency(format!(
                "key '{}' is COMPLETED but entry {} is missing",
                key, entry_id
            ))
        })?;

        if entry.idempotency_key.as_ref() != Some(key) {
            return Err(LedgerError::inconsistency(format!(
                "entry {} does not belong to key '{}'",
                entry_id, key
            )));
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credits, Direction, RequestFingerprint, UserId};
    use chrono::{Duration, Utc};

    fn fingerprint() -> RequestFingerprint {
        RequestFingerprint {
            user_id: UserId::new("u1"),
            direction: Direction::Credit,
            amount: Credits::from_minor(100),
        }
    }

    fn resolver() -> (ReplayResolver, Arc<IdempotencyRegister>) {
        let register = Arc::new(IdempotencyRegister::new(Duration::hours(1)));
        let log = Arc::new(LedgerLog::new());
        (ReplayResolver::new(Arc::clone(&register), log), register)
    }

    #[test]
    fn test_unknown_key() {
        let (resolver, _) = resolver();
        assert_eq!(
            resolver.resolve(&IdempotencyKey::new("nope")).unwrap(),
            RequestStatus::Unknown
        );
    }

    #[test]
    fn test_pending_and_failed_keys() {
        let (resolver, register) = resolver();
        let key = IdempotencyKey::new("k1");

        let outcome = register.claim(&key, fingerprint(), Utc::now()).unwrap();
        assert_eq!(resolver.resolve(&key).unwrap(), RequestStatus::InFlight);

        drop(outcome);
        assert_eq!(resolver.resolve(&key).unwrap(), RequestStatus::Failed);
    }

    #[test]
    fn test_completed_key_without_entry_fails_closed() {
        let (resolver, register) = resolver();
        let key = IdempotencyKey::new("k1");

        register
            .restore_completed(key.clone(), fingerprint(), EntryId::generate(), Utc::now())
            .unwrap();

        let result = resolver.resolve(&key);
        assert!(matches!(result, Err(LedgerError::LedgerInconsistency { .. })));
    }
}
