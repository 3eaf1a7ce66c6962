//! CSV format handling for ledger commands, balances and ledger exports
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to ledger commands
//! - Balance and ledger output serialization
//!
//! All functions are pure (no file I/O) for easy testing.

use crate::types::{
    ActorRole, BalanceView, Credits, Direction, LedgerCommand, LedgerEntry, LedgerError,
    MutationRequest,
};
use serde::Deserialize;
use std::io::Write;

/// CSV record structure for deserialization
///
/// Matches the input CSV format with columns: op, user, amount, purpose, role, key.
/// `purpose` and `key` may be empty.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CsvRecord {
    pub op: String,
    pub user: String,
    pub amount: String,
    #[serde(default)]
    pub purpose: Option<String>,
    pub role: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// Convert a CsvRecord to a LedgerCommand
///
/// - `op` is `credit` or `debit`, case-insensitive
/// - `amount` must be a positive decimal with at most two fractional digits
/// - `role` must be one of admin, system, provider, student
/// - an empty `key` means the command runs without idempotency
///
/// # Errors
///
/// `ParseError` (without a line; readers add it) describing the first problem found.
pub fn convert_csv_record(csv_record: CsvRecord) -> Result<LedgerCommand, LedgerError> {
    let invalid = |message: String| LedgerError::ParseError {
        line: None,
        message,
    };

    let direction = match csv_record.op.trim().to_lowercase().as_str() {
        "credit" => Direction::Credit,
        "debit" => Direction::Debit,
        _ => {
            return Err(invalid(format!(
                "Invalid operation '{}' for user '{}'",
                csv_record.op, csv_record.user
            )))
        }
    };

    let user = csv_record.user.trim();
    if user.is_empty() {
        return Err(invalid("Missing user".to_string()));
    }

    let amount: Credits = csv_record.amount.parse().map_err(|_| {
        invalid(format!(
            "Invalid amount '{}' for user '{}'",
            csv_record.amount, user
        ))
    })?;
    if !amount.is_positive() {
        return Err(invalid(format!(
            "Amount must be positive, got '{}' for user '{}'",
            csv_record.amount, user
        )));
    }

    let actor_role: ActorRole = csv_record
        .role
        .parse()
        .map_err(|e: LedgerError| invalid(e.to_string()))?;

    let purpose = csv_record
        .purpose
        .map(|p| p.trim().to_string())
        .unwrap_or_default();

    let mut request = MutationRequest::new(user, amount, purpose, actor_role);
    if let Some(key) = csv_record.key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        request = request.with_idempotency_key(key);
    }

    Ok(LedgerCommand { direction, request })
}

/// Write balances to CSV format
///
/// Writes balances with columns: user, balance. Rows are sorted by user for
/// deterministic output and balances carry exactly two decimals.
pub fn write_balances_csv(balances: &[BalanceView], output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record(["user", "balance"])?;

    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    for view in sorted {
        writer.write_record([view.user_id.as_str(), &view.balance.to_string()])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write ledger entries to CSV format
///
/// Columns: id, user, sequence, delta, balance_after, purpose, role, key,
/// created_at (RFC 3339). Entries are written in the order given.
pub fn write_ledger_csv<I>(entries: I, output: &mut dyn Write) -> Result<(), LedgerError>
where
    I: IntoIterator<Item = LedgerEntry>,
{
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "id",
        "user",
        "sequence",
        "delta",
        "balance_after",
        "purpose",
        "role",
        "key",
        "created_at",
    ])?;

    for entry in entries {
        writer.write_record([
            entry.id.to_string(),
            entry.user_id.to_string(),
            entry.sequence.to_string(),
            entry.delta.to_string(),
            entry.balance_after.to_string(),
            entry.purpose,
            entry.actor_role.to_string(),
            entry
                .idempotency_key
                .map(|key| key.to_string())
                .unwrap_or_default(),
            entry.created_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
