//! Asynchronous batch command driver
//!
//! Reads commands in batches and runs each batch through a
//! [`BatchProcessor`] on a multi-threaded tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (user partitioning + tasks)
//!         └── TransactionCoordinator (shared ledger state)
//! ```
//!
//! Batches are processed one after another, so a user whose commands span
//! several batches still sees them in file order. Within a batch, users run
//! in parallel.

use crate::core::TransactionCoordinator;
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::write_balances_csv;
use crate::strategy::{BatchProcessor, ProcessingStrategy, RunSummary};
use crate::types::LedgerError;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Batching and parallelism settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of commands per batch
    pub batch_size: usize,
    /// Worker threads in the runtime
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Build a config, replacing zero values with the defaults
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                default = default.batch_size,
                "invalid batch_size 0, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent = if max_concurrent == 0 {
            warn!(
                default = default.max_concurrent,
                "invalid max_concurrent 0, using default"
            );
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self {
            batch_size,
            max_concurrent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
}

impl AsyncProcessingStrategy {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    fn process(
        &self,
        coordinator: &TransactionCoordinator,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<RunSummary, LedgerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent)
            .enable_time()
            .build()
            .map_err(|e| LedgerError::IoError {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        let summary = runtime.block_on(async {
            let processor = BatchProcessor::new(coordinator.clone());

            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                        path: input_path.display().to_string(),
                    },
                    _ => LedgerError::IoError {
                        message: format!("Failed to open file '{}': {}", input_path.display(), e),
                    },
                })?;

            // csv-async reads futures-io, tokio files implement tokio-io
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);
            let mut summary = RunSummary::default();

            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                debug!(commands = batch.len(), "processing batch");
                for outcome in processor.process_batch(batch).await {
                    summary.record(&outcome.result)?;
                }
            }

            summary.skipped = reader.skipped();
            Ok::<_, LedgerError>(summary)
        })?;

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
