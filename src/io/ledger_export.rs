//! Full ledger export for the command driver

use crate::core::{Pagination, TransactionCoordinator};
use crate::io::csv_format::write_ledger_csv;
use crate::types::LedgerError;
use std::io::Write;

/// Write every user's entries, users sorted, each user in sequence order
///
/// Entries are fetched lazily in pages of `page_size`.
pub fn export_ledger(
    coordinator: &TransactionCoordinator,
    page_size: usize,
    output: &mut dyn Write,
) -> Result<usize, LedgerError> {
    let users = coordinator.users();
    let mut written = 0;

    let entries = users
        .iter()
        .flat_map(|user| coordinator.get_ledger(user, Pagination::first(page_size)))
        .inspect(|_| written += 1);
    write_ledger_csv(entries, output)?;

    Ok(written)
}
