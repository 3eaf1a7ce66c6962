//! Sequential command driver
//!
//! Reads the input with [`SyncReader`] and runs each command to completion
//! before reading the next, on a single-threaded tokio runtime. Output is
//! deterministic for a given input and starting state.

use crate::core::TransactionCoordinator;
use crate::io::csv_format::write_balances_csv;
use crate::io::sync_reader::SyncReader;
use crate::strategy::{apply_command, ProcessingStrategy, RunSummary};
use crate::types::LedgerError;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SyncProcessingStrategy;

impl ProcessingStrategy for SyncProcessingStrategy {
    fn process(
        &self,
        coordinator: &TransactionCoordinator,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<RunSummary, LedgerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| LedgerError::IoError {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        let reader = SyncReader::new(input_path)?;
        let mut summary = RunSummary::default();

        for row in reader {
            match row {
                Ok(command) => {
                    let result = runtime.block_on(apply_command(coordinator, &command));
                    summary.record(&result)?;
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!(error = %e, "skipping unreadable row");
                }
            }
        }

        info!(
            committed = summary.committed,
            replayed = summary.replayed,
            rejected = summary.rejected,
            skipped = summary.skipped,
            "input processed"
        );

        write_balances_csv(&coordinator.balances(), output)?;

        Ok(summary)
    }
}
