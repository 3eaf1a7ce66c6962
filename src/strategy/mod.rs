//! Command driver strategies
//!
//! A strategy reads ledger commands from a CSV file, runs each one through a
//! [`TransactionCoordinator`] and writes the resulting balances. Two
//! implementations can be selected at runtime:
//!
//! - `sync` runs commands one after another in file order
//! - `async` reads batches and runs different users in parallel while
//!   keeping each user's commands in file order

use crate::cli::StrategyType;
use crate::core::TransactionCoordinator;
use crate::types::{ErrorClass, LedgerCommand, LedgerError, Receipt};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{error, warn};

pub mod r#async;
pub mod batch_processor;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use batch_processor::{BatchProcessor, CommandResult};
pub use sync::SyncProcessingStrategy;

/// Attempts per command before a retryable error is reported
const MAX_ATTEMPTS: u32 = 5;

/// Counts of what happened to each input row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Mutations executed by this run
    pub committed: usize,
    /// Keyed commands answered from an earlier execution
    pub replayed: usize,
    /// Commands the coordinator refused
    pub rejected: usize,
    /// Rows that could not be parsed
    pub skipped: usize,
}

impl RunSummary {
    /// Count one command's result
    ///
    /// # Errors
    ///
    /// Returns the error itself when it is fatal; the run must stop.
    pub fn record(&mut self, result: &Result<Receipt, LedgerError>) -> Result<(), LedgerError> {
        match result {
            Ok(receipt) if receipt.is_replay() => self.replayed += 1,
            Ok(_) => self.committed += 1,
            Err(e) if e.class() == ErrorClass::Fatal => {
                error!(error = %e, "fatal ledger error, stopping run");
                return Err(e.clone());
            }
            Err(e) => {
                self.rejected += 1;
                warn!(error = %e, "command rejected");
            }
        }
        Ok(())
    }

    /// Total rows seen
    pub fn total(&self) -> usize {
        self.committed + self.replayed + self.rejected + self.skipped
    }
}

/// Run one command, retrying while the coordinator says the request may be resent
///
/// Retries back off linearly; the final error is returned unchanged.
pub async fn apply_command(
    coordinator: &TransactionCoordinator,
    command: &LedgerCommand,
) -> Result<Receipt, LedgerError> {
    let mut attempt = 1;
    loop {
        match coordinator
            .execute(command.direction, command.request.clone())
            .await
        {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Complete command driver pipeline
pub trait ProcessingStrategy: Send + Sync {
    /// Run every command in `input_path` and write balances to `output`
    ///
    /// Rejected commands and unreadable rows are logged and counted; only
    /// fatal errors end the run early.
    ///
    /// # Errors
    ///
    /// - the input file cannot be opened or read
    /// - a command hit a fatal ledger error
    /// - output cannot be written
    fn process(
        &self,
        coordinator: &TransactionCoordinator,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<RunSummary, LedgerError>;
}

/// Create the strategy selected on the command line
///
/// `config` is ignored by the sync strategy.
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<BatchConfig>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy),
        StrategyType::Async => {
            let config = config.unwrap_or_default();
            Box::new(AsyncProcessingStrategy::new(config))
        }
    }
}
