//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over ledger commands from a CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Iterator Interface
//!
//! SyncReader implements the Iterator trait, yielding
//! `Result<LedgerCommand, LedgerError>` for each CSV row:
//!
//! ```no_run
//! use credit_ledger::io::sync_reader::SyncReader;
//! use std::path::Path;
//!
//! let reader = SyncReader::new(Path::new("commands.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(command) => println!("{} for {}", command.direction, command.request.user_id),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual row errors are yielded as `ParseError` carrying the line number
//!
//! Records are read one at a time; memory use does not grow with file size.

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{LedgerCommand, LedgerError};
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Synchronous CSV reader
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,
    line_num: u64,
}

impl SyncReader {
    /// Open a CSV file for streaming iteration
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (trailing optional columns may be missing)
    /// - Use an 8KB buffer
    ///
    /// # Errors
    ///
    /// `FileNotFound` if the path does not exist, `IoError` otherwise.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => LedgerError::IoError {
                message: format!("Failed to open file '{}': {}", path.display(), e),
            },
        })?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 0,
        })
    }
}

impl Iterator for SyncReader {
    type Item = Result<LedgerCommand, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();
        let row = deserializer.next()?;

        self.line_num += 1;
        // Data rows start on line 2, after the header
        let line = self.line_num + 1;

        let result = row
            .map_err(LedgerError::from)
            .and_then(convert_csv_record)
            .map_err(|e| match e {
                LedgerError::ParseError { message, .. } => LedgerError::ParseError {
                    line: Some(line),
                    message,
                },
                other => other,
            });

        Some(result)
    }
}
