//! Append-only ledger of committed balance mutations
//!
//! Entries are stored per user in creation order, so a user's history is a
//! plain vector indexed by `sequence - 1`. A secondary index maps entry ids
//! back to their position for replay lookups.
//!
//! Appending happens in two steps. [`LedgerLog::append`] builds the entry
//! inside a unit of work while the user's balance lock is held; only
//! `publish` makes it visible, and only once the journal accepted it.

use super::balance_store::BalanceLock;
use crate::types::{
    ActorRole, Credits, EntryId, IdempotencyKey, LedgerEntry, LedgerError, UserId,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Where a ledger query starts and how many entries it fetches per page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Return entries with a sequence strictly greater than this (0 = from the start)
    pub after_sequence: u64,

    /// Entries fetched per page; zero is treated as one
    pub page_size: usize,
}

impl Pagination {
    pub fn new(after_sequence: u64, page_size: usize) -> Self {
        Pagination {
            after_sequence,
            page_size,
        }
    }

    pub fn first(page_size: usize) -> Self {
        Pagination::new(0, page_size)
    }
}

/// Saved position of a ledger query
///
/// Points just past the last entry the query yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCursor {
    pub user_id: UserId,
    pub after_sequence: u64,
}

/// Per-user ledger storage
#[derive(Debug, Default)]
pub struct LedgerLog {
    entries: DashMap<UserId, Vec<LedgerEntry>>,
    index: DashMap<EntryId, (UserId, u64)>,
}

impl LedgerLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new entry for the locked user
    ///
    /// The snapshot is taken from the lock's staged balance, so `apply_delta`
    /// must have succeeded first. The entry is not visible until published.
    pub fn append(
        &self,
        lock: &BalanceLock,
        delta: Credits,
        purpose: &str,
        actor_role: ActorRole,
        idempotency_key: Option<IdempotencyKey>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let balance_after = lock.staged().ok_or_else(|| {
            LedgerError::aborted(format!(
                "no staged balance for user {} when appending entry",
                lock.user_id()
            ))
        })?;

        let sequence = self.next_sequence(lock.user_id());

        Ok(LedgerEntry {
            id: EntryId::generate(),
            user_id: lock.user_id().clone(),
            sequence,
            delta,
            balance_after,
            purpose: purpose.to_string(),
            actor_role,
            created_at: at,
            idempotency_key,
        })
    }

    /// Make a committed entry visible
    ///
    /// Caller must hold the user's balance lock.
    pub(crate) fn publish(&self, entry: LedgerEntry) {
        let id = entry.id;
        let position = (entry.user_id.clone(), entry.sequence);

        self.entries
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry);

        self.index.insert(id, position);
    }

    /// Install an entry read back from the journal
    ///
    /// # Errors
    ///
    /// `LedgerInconsistency` if the id is already known or the sequence does
    /// not directly follow the user's last entry.
    pub(crate) fn restore(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        if self.index.contains_key(&entry.id) {
            return Err(LedgerError::inconsistency(format!(
                "duplicate ledger entry id {}",
                entry.id
            )));
        }

        let expected = self.next_sequence(&entry.user_id);
        if entry.sequence != expected {
            return Err(LedgerError::inconsistency(format!(
                "entry {} for user {} has sequence {}, expected {}",
                entry.id, entry.user_id, entry.sequence, expected
            )));
        }

        self.publish(entry);
        Ok(())
    }

    /// Look up a committed entry by id
    pub fn get(&self, id: &EntryId) -> Option<LedgerEntry> {
        // Copy the position out before touching the entries map.
        let (user_id, sequence) = self.index.get(id).map(|pos| pos.value().clone())?;

        let history = self.entries.get(&user_id)?;
        let slot = usize::try_from(sequence).ok()?.checked_sub(1)?;
        history.get(slot).cloned()
    }

    /// Fetch up to `limit` entries with a sequence greater than `after_sequence`
    pub fn page(&self, user_id: &UserId, after_sequence: u64, limit: usize) -> Vec<LedgerEntry> {
        let Some(history) = self.entries.get(user_id) else {
            return Vec::new();
        };

        let start = usize::try_from(after_sequence)
            .unwrap_or(usize::MAX)
            .min(history.len());

        history[start..].iter().take(limit).cloned().collect()
    }

    /// Lazy, creation-ordered view over one user's history
    pub fn query(&self, user_id: &UserId, pagination: Pagination) -> LedgerQuery<'_> {
        LedgerQuery {
            log: self,
            user_id: user_id.clone(),
            yielded_through: pagination.after_sequence,
            fetched_through: pagination.after_sequence,
            page_size: pagination.page_size.max(1),
            buffer: VecDeque::new(),
        }
    }

    /// Continue a query from a saved cursor
    pub fn resume(&self, cursor: LedgerCursor, page_size: usize) -> LedgerQuery<'_> {
        self.query(
            &cursor.user_id,
            Pagination::new(cursor.after_sequence, page_size),
        )
    }

    /// Full history of one user
    pub fn entries_for(&self, user_id: &UserId) -> Vec<LedgerEntry> {
        self.entries
            .get(user_id)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Users with at least one entry, sorted
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// Total number of committed entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn next_sequence(&self, user_id: &UserId) -> u64 {
        self.entries
            .get(user_id)
            .map(|history| history.len() as u64)
            .unwrap_or(0)
            + 1
    }
}

/// Iterator over a user's ledger that fetches one page at a time
///
/// Holds no map locks between calls to `next`, so writers for the same user
/// are never blocked by a slow reader. Entries committed after the query was
/// created are picked up by later pages.
#[derive(Debug)]
pub struct LedgerQuery<'a> {
    log: &'a LedgerLog,
    user_id: UserId,
    yielded_through: u64,
    fetched_through: u64,
    page_size: usize,
    buffer: VecDeque<LedgerEntry>,
}

impl LedgerQuery<'_> {
    /// Position after the last yielded entry
    pub fn cursor(&self) -> LedgerCursor {
        LedgerCursor {
            user_id: self.user_id.clone(),
            after_sequence: self.yielded_through,
        }
    }
}

impl Iterator for LedgerQuery<'_> {
    type Item = LedgerEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            let page = self
                .log
                .page(&self.user_id, self.fetched_through, self.page_size);

            if let Some(last) = page.last() {
                self.fetched_through = last.sequence;
            }
            self.buffer.extend(page);
        }

        let entry = self.buffer.pop_front()?;
        self.yielded_through = entry.sequence;
        Some(entry)
    }
}
