//! Fixed-point credit amounts
//!
//! Every amount in the ledger is an integer count of minor units. Decimal
//! strings coming from the outside world (CSV input, operators) are parsed with
//! exact decimal arithmetic and rejected when they carry more precision than
//! the minor unit can represent.

use super::error::LedgerError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits represented by one minor unit (`1.00` = 100).
pub const MINOR_UNIT_SCALE: u32 = 2;

const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// A signed amount of credits in minor units
///
/// Used both for balances (never negative once committed) and for ledger
/// deltas (negative for debits). Arithmetic is always checked.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(i64);

impl Credits {
    /// Zero credits
    pub const ZERO: Credits = Credits(0);

    /// Build an amount from a raw minor-unit count
    pub const fn from_minor(minor: i64) -> Self {
        Credits(minor)
    }

    /// Build an amount from whole major units (`from_major(5)` == `5.00`)
    pub fn from_major(major: i64) -> Option<Self> {
        major.checked_mul(MINOR_UNITS_PER_MAJOR).map(Credits)
    }

    /// Raw minor-unit count
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    pub fn checked_neg(self) -> Option<Credits> {
        self.0.checked_neg().map(Credits)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Exact decimal representation in major units
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, MINOR_UNIT_SCALE)
    }

    /// Convert a decimal amount in major units into minor units
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if the value has more than
    /// [`MINOR_UNIT_SCALE`] significant fractional digits or does not fit in
    /// an `i64` count of minor units.
    pub fn from_decimal(value: Decimal) -> Result<Self, LedgerError> {
        if value.normalize().scale() > MINOR_UNIT_SCALE {
            return Err(LedgerError::invalid_amount(&value.to_string()));
        }

        value
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .and_then(|minor| minor.to_i64())
            .map(Credits)
            .ok_or_else(|| LedgerError::invalid_amount(&value.to_string()))
    }
}

impl FromStr for Credits {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed).map_err(|_| LedgerError::invalid_amount(trimmed))?;
        Credits::from_decimal(value)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}
