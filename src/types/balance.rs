//! Per-user balance types

use super::amount::Credits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User identifier as supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        UserId(id)
    }
}

/// Committed balance row for one user
///
/// Created lazily by the first committed mutation and never deleted.
/// `balance` is never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBalance {
    /// Owner of the balance
    pub user_id: UserId,

    /// Current balance in minor units
    pub balance: Credits,

    /// Commit time of the last mutation
    pub updated_at: DateTime<Utc>,
}

/// Result of a balance status query
///
/// Users that never had a committed mutation report a zero balance and no
/// `last_updated` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Credits,
    pub last_updated: Option<DateTime<Utc>>,
}

impl BalanceView {
    pub(crate) fn empty(user_id: UserId) -> Self {
        BalanceView {
            user_id,
            balance: Credits::ZERO,
            last_updated: None,
        }
    }
}

impl From<UserBalance> for BalanceView {
    fn from(row: UserBalance) -> Self {
        BalanceView {
            user_id: row.user_id,
            balance: row.balance,
            last_updated: Some(row.updated_at),
        }
    }
}
