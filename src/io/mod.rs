//! I/O module
//!
//! CSV command input and balance/ledger output for the command driver.
//!
//! # Components
//!
//! - `csv_format` - Record conversion and output serialization
//! - `sync_reader` - Iterator over commands in a file
//! - `async_reader` - Batch reader for the async driver
//! - `ledger_export` - Paged export of every user's entries

pub mod async_reader;
pub mod csv_format;
pub mod ledger_export;
pub mod sync_reader;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_csv_record, write_balances_csv, write_ledger_csv, CsvRecord,
};
pub use ledger_export::export_ledger;
pub use sync_reader::SyncReader;
