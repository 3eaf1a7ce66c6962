//! Idempotency register
//!
//! Tracks mutation requests by their client-supplied key so a retried request
//! is never executed twice. Each key moves through a small state machine:
//!
//! ```text
//!   (absent) --claim--> PENDING --complete--> COMPLETED
//!                          |
//!                          +--fail/abandon--> FAILED --claim--> PENDING (new record)
//! ```
//!
//! A `PENDING` record is owned by exactly one [`ClaimTicket`]. Completing
//! requires the ticket, and dropping an unused ticket fails the key, so an
//! aborted request never leaves its key stuck.
//!
//! While the owner writes its entry to the journal the record is flagged as
//! committing. It still reads as `PENDING`, but it can no longer be failed,
//! so an entry that reached the journal always ends up `COMPLETED`. The
//! register's map is not held during that write.
//!
//! Expiry is only acted on by housekeeping. The hot path keeps replaying an
//! expired `COMPLETED` record until it has been purged.

use crate::types::{
    EntryId, IdempotencyKey, IdempotencyRecord, IdempotencyStatus, LedgerError,
    RequestFingerprint,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of trying to claim a key
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A new `PENDING` record now belongs to the caller
    Claimed(ClaimTicket),
    /// The key already produced this entry; nothing was changed
    AlreadyCompleted(EntryId),
    /// Another request holds the key right now
    AlreadyInFlight,
}

/// Thread-safe idempotency register
#[derive(Debug)]
pub struct IdempotencyRegister {
    records: DashMap<IdempotencyKey, IdempotencyRecord>,
    ttl: Duration,
}

impl IdempotencyRegister {
    /// Create an empty register whose records expire `ttl` after creation
    pub fn new(ttl: Duration) -> Self {
        IdempotencyRegister {
            records: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim `key` for a request with the given fingerprint
    ///
    /// Never waits: an in-flight holder is reported, not awaited.
    ///
    /// A `FAILED` key is free again: any request may claim it, whatever the
    /// failed attempt asked for.
    ///
    /// # Errors
    ///
    /// - `IdempotencyKeyReuse` if a `PENDING` or `COMPLETED` key belongs to a
    ///   different request
    /// - `LedgerInconsistency` if a completed record has no entry id
    pub fn claim(
        self: &Arc<Self>,
        key: &IdempotencyKey,
        fingerprint: RequestFingerprint,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, LedgerError> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                let (status, result_entry_id) = (existing.status, existing.result_entry_id);
                if status != IdempotencyStatus::Failed && existing.fingerprint != fingerprint {
                    return Err(LedgerError::key_reuse(key));
                }

                match status {
                    IdempotencyStatus::Completed => {
                        let entry_id = result_entry_id.ok_or_else(|| {
                            LedgerError::inconsistency(format!(
                                "key '{}' is COMPLETED without a result entry",
                                key
                            ))
                        })?;
                        Ok(ClaimOutcome::AlreadyCompleted(entry_id))
                    }
                    IdempotencyStatus::Pending => Ok(ClaimOutcome::AlreadyInFlight),
                    IdempotencyStatus::Failed => {
                        let record = self.pending_record(key, fingerprint, now);
                        let token = record.claim_token;
                        occupied.insert(record);
                        debug!(key = %key, "reclaimed failed idempotency key");
                        Ok(ClaimOutcome::Claimed(self.ticket(key, token)))
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let record = self.pending_record(key, fingerprint, now);
                let token = record.claim_token;
                vacant.insert(record);
                Ok(ClaimOutcome::Claimed(self.ticket(key, token)))
            }
        }
    }

    /// Mark the ticket's key `COMPLETED`, running `commit` first
    ///
    /// The record is flagged as committing before `commit` runs and the map
    /// is released while it runs, so claims on other keys never wait for the
    /// journal. If `commit` fails the flag is cleared, the record stays
    /// `PENDING` and the ticket's drop fails it.
    ///
    /// # Errors
    ///
    /// - `TransactionAborted` if the claim was lost (e.g. abandoned by an operator)
    /// - any error returned by `commit`
    pub fn complete<T, F>(
        &self,
        ticket: &ClaimTicket,
        entry_id: EntryId,
        commit: F,
    ) -> Result<T, LedgerError>
    where
        F: FnOnce() -> Result<T, LedgerError>,
    {
        self.begin_commit(ticket)?;

        let outcome = commit();

        let Some(mut record) = self.records.get_mut(&ticket.key) else {
            return Err(LedgerError::inconsistency(format!(
                "key '{}' disappeared while committing",
                ticket.key
            )));
        };
        record.committing = false;

        let value = outcome?;
        record.status = IdempotencyStatus::Completed;
        record.result_entry_id = Some(entry_id);
        Ok(value)
    }

    fn begin_commit(&self, ticket: &ClaimTicket) -> Result<(), LedgerError> {
        let Some(mut record) = self.records.get_mut(&ticket.key) else {
            return Err(LedgerError::aborted(format!(
                "claim on key '{}' disappeared before commit",
                ticket.key
            )));
        };

        if record.status != IdempotencyStatus::Pending
            || record.claim_token != ticket.token
            || record.committing
        {
            return Err(LedgerError::aborted(format!(
                "claim on key '{}' is no longer held (status {})",
                ticket.key, record.status
            )));
        }

        record.committing = true;
        Ok(())
    }

    /// Move a `PENDING` key to `FAILED`
    ///
    /// This is also the operator's abandon action for a stuck request.
    ///
    /// # Errors
    ///
    /// - `UnknownKey` if no record exists
    /// - `InvalidTransition` if the record is already terminal, or its owner
    ///   is committing
    pub fn fail(&self, key: &IdempotencyKey) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| LedgerError::unknown_key(key))?;

        if record.status != IdempotencyStatus::Pending || record.committing {
            return Err(LedgerError::invalid_transition(
                key,
                record.status,
                IdempotencyStatus::Failed,
            ));
        }

        record.status = IdempotencyStatus::Failed;
        Ok(())
    }

    /// Fail the key on behalf of an unused ticket
    pub(crate) fn fail_claim(&self, key: &IdempotencyKey, token: Uuid) {
        match self.records.get_mut(key) {
            Some(mut record)
                if record.claim_token == token
                    && record.status == IdempotencyStatus::Pending
                    && !record.committing =>
            {
                record.status = IdempotencyStatus::Failed;
                debug!(key = %key, "idempotency key failed on rollback");
            }
            Some(record) => {
                warn!(
                    key = %key,
                    status = %record.status,
                    "rolled back claim no longer owns its key"
                );
            }
            None => warn!(key = %key, "rolled back claim found no record"),
        }
    }

    /// Install a completed record rebuilt from the journal
    pub(crate) fn restore_completed(
        &self,
        key: IdempotencyKey,
        fingerprint: RequestFingerprint,
        entry_id: EntryId,
        created_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        match self.records.entry(key) {
            Entry::Occupied(occupied) => Err(LedgerError::inconsistency(format!(
                "idempotency key '{}' used by more than one journaled entry",
                occupied.key()
            ))),
            Entry::Vacant(vacant) => {
                let record = IdempotencyRecord {
                    key: vacant.key().clone(),
                    status: IdempotencyStatus::Completed,
                    result_entry_id: Some(entry_id),
                    fingerprint,
                    claim_token: Uuid::now_v7(),
                    committing: false,
                    created_at,
                    expires_at: created_at + self.ttl,
                };
                vacant.insert(record);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.records.get(key).map(|record| record.value().clone())
    }

    /// Remove terminal records whose expiry has passed
    ///
    /// `PENDING` records are never removed, whatever their age.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut purged = 0;
        self.records.retain(|_, record| {
            let expired = record.status.is_terminal() && record.is_expired(now);
            if expired {
                purged += 1;
            }
            !expired
        });
        purged
    }

    /// `PENDING` records created at least `older_than` before `now`, oldest first
    pub fn stale_pending(&self, now: DateTime<Utc>, older_than: Duration) -> Vec<IdempotencyRecord> {
        let mut stale: Vec<IdempotencyRecord> = self
            .records
            .iter()
            .filter(|record| {
                record.status == IdempotencyStatus::Pending && now - record.created_at >= older_than
            })
            .map(|record| record.value().clone())
            .collect();
        stale.sort_by_key(|record| record.created_at);
        stale
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn pending_record(
        &self,
        key: &IdempotencyKey,
        fingerprint: RequestFingerprint,
        now: DateTime<Utc>,
    ) -> IdempotencyRecord {
        IdempotencyRecord {
            key: key.clone(),
            status: IdempotencyStatus::Pending,
            result_entry_id: None,
            fingerprint,
            claim_token: Uuid::now_v7(),
            committing: false,
            created_at: now,
            expires_at: now + self.ttl,
        }
    }

    fn ticket(self: &Arc<Self>, key: &IdempotencyKey, token: Uuid) -> ClaimTicket {
        ClaimTicket {
            register: Arc::clone(self),
            key: key.clone(),
            token,
            armed: true,
        }
    }
}

/// Ownership of a `PENDING` idempotency record
///
/// Dropping an armed ticket fails its key. `disarm` is called once the key
/// has been completed.
#[derive(Debug)]
pub struct ClaimTicket {
    register: Arc<IdempotencyRegister>,
    key: IdempotencyKey,
    token: Uuid,
    armed: bool,
}

impl ClaimTicket {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        if self.armed {
            self.register.fail_claim(&self.key, self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credits, Direction, UserId};

    fn register() -> Arc<IdempotencyRegister> {
        Arc::new(IdempotencyRegister::new(Duration::hours(24)))
    }

    fn fingerprint(minor: i64) -> RequestFingerprint {
        RequestFingerprint {
            user_id: UserId::new("u1"),
            direction: Direction::Credit,
            amount: Credits::from_minor(minor),
        }
    }

    fn claim_ticket(register: &Arc<IdempotencyRegister>, key: &IdempotencyKey) -> ClaimTicket {
        match register.claim(key, fingerprint(100), Utc::now()).unwrap() {
            ClaimOutcome::Claimed(ticket) => ticket,
            other => panic!("expected a fresh claim, got {:?}", other),
        }
    }

    #[test]
    fn test_claim_inserts_pending_record() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let _ticket = claim_ticket(&register, &key);
        let record = register.get(&key).unwrap();

        assert_eq!(record.status, IdempotencyStatus::Pending);
        assert_eq!(record.result_entry_id, None);
        assert_eq!(record.expires_at - record.created_at, Duration::hours(24));
    }

    #[test]
    fn test_second_claim_sees_in_flight() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let _ticket = claim_ticket(&register, &key);
        let outcome = register.claim(&key, fingerprint(100), Utc::now()).unwrap();

        assert!(matches!(outcome, ClaimOutcome::AlreadyInFlight));
    }

    #[test]
    fn test_complete_then_claim_replays() {
        let register = register();
        let key = IdempotencyKey::new("k1");
        let entry_id = EntryId::generate();

        let ticket = claim_ticket(&register, &key);
        let value = register.complete(&ticket, entry_id, || Ok(42)).unwrap();
        ticket.disarm();

        assert_eq!(value, 42);
        assert_eq!(register.get(&key).unwrap().status, IdempotencyStatus::Completed);

        match register.claim(&key, fingerprint(100), Utc::now()).unwrap() {
            ClaimOutcome::AlreadyCompleted(id) => assert_eq!(id, entry_id),
            other => panic!("expected replay, got {:?}", other),
        }
    }

    #[test]
    fn test_different_fingerprint_is_key_reuse() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let _ticket = claim_ticket(&register, &key);
        let result = register.claim(&key, fingerprint(999), Utc::now());

        assert_eq!(result.unwrap_err(), LedgerError::key_reuse(&key));
        assert_eq!(register.get(&key).unwrap().fingerprint, fingerprint(100));
    }

    #[test]
    fn test_dropped_ticket_fails_key_and_allows_reclaim() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let first_token = {
            let ticket = claim_ticket(&register, &key);
            ticket.token
        };
        assert_eq!(register.get(&key).unwrap().status, IdempotencyStatus::Failed);

        let ticket = claim_ticket(&register, &key);
        assert_ne!(ticket.token, first_token);
        assert_eq!(register.get(&key).unwrap().status, IdempotencyStatus::Pending);
    }

    #[test]
    fn test_failed_commit_leaves_key_pending_until_ticket_drops() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let ticket = claim_ticket(&register, &key);
        let result: Result<(), LedgerError> =
            register.complete(&ticket, EntryId::generate(), || Err(LedgerError::aborted("disk full")));

        assert!(matches!(result, Err(LedgerError::TransactionAborted { .. })));
        let record = register.get(&key).unwrap();
        assert_eq!(record.status, IdempotencyStatus::Pending);
        assert!(!record.committing);

        drop(ticket);
        let record = register.get(&key).unwrap();
        assert_eq!(record.status, IdempotencyStatus::Failed);
        assert_eq!(record.result_entry_id, None);
    }

    #[test]
    fn test_commit_runs_without_holding_the_register() {
        let register = register();
        let key = IdempotencyKey::new("k1");
        let entry_id = EntryId::generate();

        let ticket = claim_ticket(&register, &key);
        let others = register
            .complete(&ticket, entry_id, || {
                assert!(register.get(&key).unwrap().committing);
                assert!(matches!(
                    register.claim(&key, fingerprint(100), Utc::now()),
                    Ok(ClaimOutcome::AlreadyInFlight)
                ));
                assert_eq!(
                    register.fail(&key).unwrap_err(),
                    LedgerError::invalid_transition(
                        &key,
                        IdempotencyStatus::Pending,
                        IdempotencyStatus::Failed
                    )
                );

                // Enough keys that some share a map shard with `k1`
                let mut tickets = Vec::new();
                for i in 0..128 {
                    let other = IdempotencyKey::new(format!("other-{}", i));
                    tickets.push(claim_ticket(&register, &other));
                }
                Ok(tickets.len())
            })
            .unwrap();
        ticket.disarm();

        assert_eq!(others, 128);
        let record = register.get(&key).unwrap();
        assert_eq!(record.status, IdempotencyStatus::Completed);
        assert_eq!(record.result_entry_id, Some(entry_id));
        assert!(!record.committing);
    }

    #[test]
    fn test_failed_key_can_be_claimed_for_a_different_request() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        drop(claim_ticket(&register, &key));
        assert_eq!(register.get(&key).unwrap().status, IdempotencyStatus::Failed);

        let outcome = register.claim(&key, fingerprint(40), Utc::now()).unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
        assert_eq!(register.get(&key).unwrap().fingerprint, fingerprint(40));
    }

    #[test]
    fn test_abandoned_claim_cannot_complete() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        let ticket = claim_ticket(&register, &key);
        register.fail(&key).unwrap();

        let mut ran = false;
        let result = register.complete(&ticket, EntryId::generate(), || {
            ran = true;
            Ok(())
        });

        assert!(matches!(result, Err(LedgerError::TransactionAborted { .. })));
        assert!(!ran);
    }

    #[test]
    fn test_fail_rejects_terminal_and_unknown_keys() {
        let register = register();
        let key = IdempotencyKey::new("k1");

        assert_eq!(register.fail(&key).unwrap_err(), LedgerError::unknown_key(&key));

        let ticket = claim_ticket(&register, &key);
        register.complete(&ticket, EntryId::generate(), || Ok(())).unwrap();
        ticket.disarm();

        assert_eq!(
            register.fail(&key).unwrap_err(),
            LedgerError::invalid_transition(
                &key,
                IdempotencyStatus::Completed,
                IdempotencyStatus::Failed
            )
        );
    }

    #[test]
    fn test_expired_completed_record_still_replays() {
        let register = Arc::new(IdempotencyRegister::new(Duration::seconds(1)));
        let key = IdempotencyKey::new("k1");
        let entry_id = EntryId::generate();
        let long_ago = Utc::now() - Duration::days(3);

        register
            .restore_completed(key.clone(), fingerprint(100), entry_id, long_ago)
            .unwrap();

        let outcome = register.claim(&key, fingerprint(100), Utc::now()).unwrap();
        assert!(matches!(outcome, ClaimOutcome::AlreadyCompleted(id) if id == entry_id));
    }

    #[test]
    fn test_purge_expired_keeps_pending() {
        let register = Arc::new(IdempotencyRegister::new(Duration::seconds(10)));
        let past = Utc::now() - Duration::minutes(5);

        register
            .restore_completed(IdempotencyKey::new("done"), fingerprint(100), EntryId::generate(), past)
            .unwrap();

        let stuck = IdempotencyKey::new("stuck");
        let _ticket = match register.claim(&stuck, fingerprint(100), past).unwrap() {
            ClaimOutcome::Claimed(ticket) => ticket,
            other => panic!("expected a fresh claim, got {:?}", other),
        };

        assert_eq!(register.purge_expired(Utc::now()), 1);
        assert!(register.get(&IdempotencyKey::new("done")).is_none());
        assert!(register.get(&stuck).is_some());
    }

    #[test]
    fn test_stale_pending_reports_only_old_claims() {
        let register = register();
        let now = Utc::now();

        let old = IdempotencyKey::new("old");
        let fresh = IdempotencyKey::new("fresh");
        let _old_ticket = register.claim(&old, fingerprint(100), now - Duration::minutes(30)).unwrap();
        let _fresh_ticket = register.claim(&fresh, fingerprint(100), now).unwrap();

        let stale = register.stale_pending(now, Duration::minutes(10));
        let keys: Vec<&IdempotencyKey> = stale.iter().map(|record| &record.key).collect();

        assert_eq!(keys, vec![&old]);
        assert_eq!(register.get(&old).unwrap().status, IdempotencyStatus::Pending);
    }

    #[test]
    fn test_restore_rejects_duplicate_key() {
        let register = register();
        let key = IdempotencyKey::new("k1");
        let now = Utc::now();

        register
            .restore_completed(key.clone(), fingerprint(100), EntryId::generate(), now)
            .unwrap();
        let result = register.restore_completed(key, fingerprint(100), EntryId::generate(), now);

        assert!(matches!(result, Err(LedgerError::LedgerInconsistency { .. })));
    }
}
