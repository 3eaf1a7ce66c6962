//! Ledger entry types
//!
//! A ledger entry is the immutable record of one committed balance mutation.
//! It carries the balance snapshot taken at commit time, which is what makes
//! replays deterministic: a replayed response returns the stored
//! `balance_after`, not the user's current balance.

use super::amount::Credits;
use super::balance::UserId;
use super::error::LedgerError;
use super::idempotency::IdempotencyKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Durable ledger entry identifier (UUIDv7, ordered by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Allocate a fresh time-ordered id
    pub fn generate() -> Self {
        EntryId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of the authenticated actor that requested a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Admin,
    System,
    Provider,
    Student,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
            ActorRole::Provider => "provider",
            ActorRole::Student => "student",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(ActorRole::Admin),
            "system" => Ok(ActorRole::System),
            "provider" => Ok(ActorRole::Provider),
            "student" => Ok(ActorRole::Student),
            other => Err(LedgerError::InvalidActorRole {
                role: other.to_string(),
            }),
        }
    }
}

/// Immutable record of one committed balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Durable, unique entry id
    pub id: EntryId,

    /// User whose balance changed
    pub user_id: UserId,

    /// Per-user creation order, starting at 1 and without gaps
    pub sequence: u64,

    /// Signed change applied to the balance (negative for debits)
    pub delta: Credits,

    /// Balance immediately after this delta, fixed at commit time
    pub balance_after: Credits,

    /// Free-form business reason supplied by the caller
    pub purpose: String,

    /// Role of the actor that requested the mutation
    pub actor_role: ActorRole,

    /// Commit time
    pub created_at: DateTime<Utc>,

    /// Idempotency key of the originating request, if any
    pub idempotency_key: Option<IdempotencyKey>,
}
