//! Credit Ledger CLI
//!
//! Applies credit and debit commands from a CSV file to the ledger and
//! prints the resulting balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- commands.csv > balances.csv
//! cargo run -- --strategy sync commands.csv > balances.csv
//! cargo run -- --journal ledger.jsonl --ledger-output entries.csv commands.csv > balances.csv
//! RUST_LOG=debug cargo run -- --log-format json commands.csv > balances.csv
//! ```
//!
//! With `--journal` (or `journal_path` in `--config`, or the
//! `CREDIT_LEDGER_JOURNAL` environment variable) state is recovered from the
//! journal at start-up and every committed entry is appended to it, so
//! re-running the same keyed commands replays instead of double-applying.
//!
//! # Exit Codes
//!
//! - 0: Success (individual rejected commands are logged, not fatal)
//! - 1: Error (bad arguments or config, unreadable input, journal or recovery failure)

use chrono::Utc;
use credit_ledger::cli::{self, CliArgs, LogFormat};
use credit_ledger::config::LedgerConfig;
use credit_ledger::core::TransactionCoordinator;
use credit_ledger::io::export_ledger;
use credit_ledger::strategy;
use credit_ledger::types::LedgerError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Age after which a PENDING key is reported as stuck
const STALE_PENDING_SECS: i64 = 3600;

fn main() {
    let args = cli::parse_args();
    init_logging(args.log_format);

    if let Err(e) = run(&args) {
        error!(error = %e, "credit-ledger failed");
        process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(args: &CliArgs) -> Result<LedgerConfig, LedgerError> {
    let config = match &args.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    }
    .apply_env()?;

    Ok(match &args.journal {
        Some(path) => config.with_journal(path),
        None => config,
    })
}

fn run(args: &CliArgs) -> Result<(), LedgerError> {
    let config = load_config(args)?;

    let (coordinator, recovered) = TransactionCoordinator::open(&config)?;
    if recovered.entries > 0 {
        info!(
            entries = recovered.entries,
            users = recovered.users,
            keys = recovered.idempotency_keys,
            "resuming from journal"
        );
    }

    let batch_config = match args.strategy {
        cli::StrategyType::Async => Some(args.to_batch_config()),
        cli::StrategyType::Sync => None,
    };
    let driver = strategy::create_strategy(args.strategy.clone(), batch_config);

    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    driver.process(&coordinator, &args.input_file, &mut output)?;
    output.flush()?;

    if let Some(path) = &args.ledger_output {
        let file = File::create(path).map_err(|e| LedgerError::IoError {
            message: format!("Failed to create '{}': {}", path.display(), e),
        })?;
        let mut writer = BufWriter::new(file);
        let written = export_ledger(&coordinator, config.ledger_page_size, &mut writer)?;
        writer.flush()?;
        info!(entries = written, path = %path.display(), "ledger exported");
    }

    housekeeping(&coordinator)
}

fn housekeeping(coordinator: &TransactionCoordinator) -> Result<(), LedgerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| LedgerError::IoError {
            message: format!("Failed to create tokio runtime: {}", e),
        })?;

    let keeper = coordinator.housekeeper();
    runtime.block_on(keeper.audit());

    let now = Utc::now();
    keeper.stale_pending(now, chrono::Duration::seconds(STALE_PENDING_SECS));
    keeper.purge_expired(now);

    Ok(())
}
