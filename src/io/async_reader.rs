//! Asynchronous CSV reader with batch interface
//!
//! Reads ledger commands in batches through csv-async so the async driver
//! never holds more than one batch in memory.
//!
//! ```text
//! CSV Reader → AsyncReader → Vec<LedgerCommand>
//!                  ↓
//!           csv_format module
//!           (CsvRecord, convert_csv_record)
//! ```

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{LedgerCommand, LedgerError};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous CSV reader
///
/// Rows that fail to parse are logged and skipped; [`AsyncReader::skipped`]
/// reports how many.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    line_num: u64,
    skipped: usize,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            line_num: 0,
            skipped: 0,
        }
    }

    /// Read up to `batch_size` commands
    ///
    /// Returns an empty vector at end of input.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<LedgerCommand> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<CsvRecord>();

        while batch.len() < batch_size {
            let row = match records.next().await {
                Some(row) => row,
                None => break,
            };

            self.line_num += 1;
            // Data rows start on line 2, after the header
            let line = self.line_num + 1;

            let converted = row
                .map_err(|e| LedgerError::ParseError {
                    line: Some(line),
                    message: e.to_string(),
                })
                .and_then(convert_csv_record);

            match converted {
                Ok(command) => batch.push(command),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line, error = %e, "skipping unreadable row");
                }
            }
        }

        batch
    }

    /// Number of rows skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
