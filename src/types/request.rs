//! Mutation request and receipt types

use super::amount::Credits;
use super::balance::UserId;
use super::entry::{ActorRole, LedgerEntry};
use super::idempotency::IdempotencyKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increase the balance
    Credit,
    /// Decrease the balance (overdraft protected)
    Debit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => f.write_str("credit"),
            Direction::Debit => f.write_str("debit"),
        }
    }
}

/// A credit or debit request as handed over by the API layer
///
/// The actor role comes from an already authenticated identity and is
/// trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub user_id: UserId,

    /// Positive amount to move; the direction decides the sign of the delta
    pub amount: Credits,

    pub purpose: String,

    pub actor_role: ActorRole,

    /// Optional key; without one the request has at-least-once semantics
    pub idempotency_key: Option<IdempotencyKey>,
}

impl MutationRequest {
    pub fn new(
        user_id: impl Into<UserId>,
        amount: Credits,
        purpose: impl Into<String>,
        actor_role: ActorRole,
    ) -> Self {
        MutationRequest {
            user_id: user_id.into(),
            amount,
            purpose: purpose.into(),
            actor_role,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub(crate) fn fingerprint(&self, direction: Direction) -> RequestFingerprint {
        RequestFingerprint {
            user_id: self.user_id.clone(),
            direction,
            amount: self.amount,
        }
    }
}

/// The parts of a request that must match when an idempotency key is reused
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    pub user_id: UserId,
    pub direction: Direction,
    pub amount: Credits,
}

/// How a successful response came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The mutation was executed by this request
    Committed,
    /// An earlier request with the same key already executed it
    Replayed,
}

/// Successful outcome of a credit or debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub entry: LedgerEntry,
    pub disposition: Disposition,
}

impl Receipt {
    pub fn is_replay(&self) -> bool {
        self.disposition == Disposition::Replayed
    }
}

/// One credit or debit read from an input source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommand {
    pub direction: Direction,
    pub request: MutationRequest,
}
