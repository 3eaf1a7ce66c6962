//! Idempotency record types

use super::entry::EntryId;
use super::request::RequestFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-supplied token guaranteeing at-most-once execution of a mutation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        IdempotencyKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(key: &str) -> Self {
        IdempotencyKey::new(key)
    }
}

impl From<String> for IdempotencyKey {
    fn from(key: String) -> Self {
        IdempotencyKey(key)
    }
}

/// Lifecycle state of an idempotency record
///
/// `Pending` moves to `Completed` or `Failed` exactly once. Terminal states
/// never move again; a `Failed` key can only be replaced by a fresh claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyStatus::Pending)
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IdempotencyStatus::Pending => "PENDING",
            IdempotencyStatus::Completed => "COMPLETED",
            IdempotencyStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Tracked state of one idempotent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Unique client-supplied key
    pub key: IdempotencyKey,

    /// Current lifecycle state
    pub status: IdempotencyStatus,

    /// Ledger entry produced by the request (set when `Completed`)
    pub result_entry_id: Option<EntryId>,

    /// What the claiming request asked for; later requests must match it
    pub fingerprint: RequestFingerprint,

    /// Identifies the claim attempt that owns a `Pending` record
    pub claim_token: Uuid,

    /// The owner is writing its entry to the journal; a `Pending` record in
    /// this state cannot be failed or abandoned
    pub committing: bool,

    pub created_at: DateTime<Utc>,

    /// After this instant housekeeping may purge a terminal record
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
