//! Configuration for the ledger

use crate::types::LedgerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`LedgerConfig::journal_path`]
pub const JOURNAL_ENV: &str = "CREDIT_LEDGER_JOURNAL";

/// Environment variable overriding [`LedgerConfig::idempotency_ttl_secs`]
pub const IDEMPOTENCY_TTL_ENV: &str = "CREDIT_LEDGER_IDEMPOTENCY_TTL_SECS";

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-lines journal; `None` keeps everything in memory
    pub journal_path: Option<PathBuf>,

    /// Lifetime of idempotency records before housekeeping may purge them
    pub idempotency_ttl_secs: u64,

    /// Entries fetched per page when walking a user's ledger
    pub ledger_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            idempotency_ttl_secs: 86_400, // 24 hours
            ledger_page_size: 100,
        }
    }
}

impl LedgerConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => LedgerError::config(format!("Failed to read {}: {}", path.display(), e)),
        })?;

        let config: LedgerConfig = toml::from_str(&content)
            .map_err(|e| LedgerError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, LedgerError> {
        LedgerConfig::default().apply_env()
    }

    /// Apply environment overrides on top of this configuration
    pub fn apply_env(mut self) -> Result<Self, LedgerError> {
        if let Ok(journal) = std::env::var(JOURNAL_ENV) {
            self.journal_path = Some(PathBuf::from(journal));
        }

        if let Ok(ttl) = std::env::var(IDEMPOTENCY_TTL_ENV) {
            self.idempotency_ttl_secs = ttl.trim().parse().map_err(|e| {
                LedgerError::config(format!("Invalid {} '{}': {}", IDEMPOTENCY_TTL_ENV, ttl, e))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        i64::try_from(self.idempotency_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.idempotency_ttl_secs == 0 {
            return Err(LedgerError::config("idempotency_ttl_secs must be positive"));
        }
        if self.ledger_page_size == 0 {
            return Err(LedgerError::config("ledger_page_size must be positive"));
        }
        Ok(())
    }
}
