//! Journal implementations
//!
//! - [`NullJournal`] keeps nothing; state lives only in memory.
//! - [`FileJournal`] writes one JSON object per line and syncs the file
//!   after every entry.
//!
//! On open, a file journal reads back everything it holds. A torn last line
//! (unterminated, from a crash in the middle of a write) is cut off with a
//! warning. Any other damaged line, including a newline-terminated last one,
//! cannot be explained by a crash and is reported as an inconsistency.

use super::traits::Journal;
use crate::types::{LedgerEntry, LedgerError};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Journal that persists nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn append(&self, _entry: &LedgerEntry) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug)]
struct JournalFile {
    file: File,
    len: u64,
}

/// JSON-lines journal backed by a single file
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    inner: Mutex<JournalFile>,
}

impl FileJournal {
    /// Open (or create) the journal at `path` and read back its entries
    ///
    /// Entries are returned in file order. Verifying them against each other
    /// is left to recovery.
    ///
    /// # Errors
    ///
    /// - `Journal` if the file cannot be opened, read or repaired
    /// - `LedgerInconsistency` if any line other than an unterminated last
    ///   one is damaged
    pub fn open(path: impl AsRef<Path>) -> Result<(FileJournal, Vec<LedgerEntry>), LedgerError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |action: &str, e: std::io::Error| {
            LedgerError::journal(format!("cannot {} {}: {}", action, path.display(), e))
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error("open", e))?;

        let mut reader = BufReader::new(&file);
        let mut entries = Vec::new();
        let mut line = String::new();
        let mut offset: u64 = 0;
        let mut line_number: u64 = 0;
        let mut torn: Option<(u64, u64, String)> = None;
        let mut ends_with_newline = true;

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| io_error("read", e))?;
            if read == 0 {
                break;
            }
            line_number += 1;

            if let Some((_, bad_line, error)) = torn.take() {
                return Err(LedgerError::inconsistency(format!(
                    "journal {} line {} is damaged: {}",
                    path.display(),
                    bad_line,
                    error
                )));
            }

            ends_with_newline = line.ends_with('\n');
            let content = line.trim();
            if !content.is_empty() {
                match serde_json::from_str::<LedgerEntry>(content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => torn = Some((offset, line_number, e.to_string())),
                }
            }

            offset += read as u64;
        }
        drop(reader);

        let mut len = offset;
        if let Some((at, bad_line, error)) = torn {
            if ends_with_newline {
                // A terminated line was written in full; a crash cannot explain it.
                return Err(LedgerError::inconsistency(format!(
                    "journal {} line {} is damaged: {}",
                    path.display(),
                    bad_line,
                    error
                )));
            }
            warn!(
                path = %path.display(),
                line = bad_line,
                error = %error,
                "truncating torn journal tail"
            );
            file.set_len(at).map_err(|e| io_error("truncate", e))?;
            len = at;
            ends_with_newline = true;
        }
        drop(file);

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| io_error("reopen", e))?;

        if !ends_with_newline {
            // Last entry was written but its terminator was not.
            file.write_all(b"\n").map_err(|e| io_error("repair", e))?;
            len += 1;
        }

        info!(path = %path.display(), entries = entries.len(), "journal opened");

        Ok((
            FileJournal {
                path,
                inner: Mutex::new(JournalFile { file, len }),
            },
            entries,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| LedgerError::journal(format!("cannot encode entry {}: {}", entry.id, e)))?;
        line.push(b'\n');

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| LedgerError::journal("journal writer lock poisoned"))?;

        let written = inner
            .file
            .write_all(&line)
            .and_then(|_| inner.file.sync_data());

        match written {
            Ok(()) => {
                inner.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Drop any partial line so the next append starts clean.
                let len = inner.len;
                if let Err(repair) = inner.file.set_len(len) {
                    warn!(path = %self.path.display(), error = %repair, "cannot cut partial journal write");
                }
                Err(LedgerError::journal(format!(
                    "cannot append entry {} to {}: {}",
                    entry.id,
                    self.path.display(),
                    e
                )))
            }
        }
    }
}
