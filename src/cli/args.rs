use crate::strategy::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Apply credit and debit commands to the ledger
#[derive(Parser, Debug)]
#[command(name = "credit-ledger")]
#[command(about = "Apply credit and debit commands to an idempotent credit ledger", long_about = None)]
pub struct CliArgs {
    /// Input CSV file with columns op,user,amount,purpose,role,key
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Driver: 'sync' runs commands in file order, 'async' runs users in parallel"
    )]
    pub strategy: StrategyType,

    /// Number of commands per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of commands per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Worker threads (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Worker threads for parallel users (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    #[arg(long = "config", value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Overrides the journal from the config file and environment
    #[arg(
        long = "journal",
        value_name = "FILE",
        help = "JSON-lines journal to recover from and append to"
    )]
    pub journal: Option<PathBuf>,

    #[arg(
        long = "ledger-output",
        value_name = "FILE",
        help = "Also write every ledger entry to this CSV file"
    )]
    pub ledger_output: Option<PathBuf>,

    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        help = "Log format on stderr: 'text' or 'json'"
    )]
    pub log_format: LogFormat,
}

/// Available command drivers
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

/// Log output formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl CliArgs {
    /// Batch settings from the arguments, defaults for anything not given
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent.unwrap_or(default.max_concurrent),
            )
        } else {
            BatchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_strategy(&["program", "input.csv"], StrategyType::Async)]
    #[case::explicit_sync(&["program", "--strategy", "sync", "input.csv"], StrategyType::Sync)]
    #[case::explicit_async(&["program", "--strategy", "async", "input.csv"], StrategyType::Async)]
    fn test_strategy_parsing(#[case] args: &[&str], #[case] expected: StrategyType) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.strategy, expected);
    }

    #[rstest]
    #[case::batch_size(&["program", "--batch-size", "250", "input.csv"], Some(250), None)]
    #[case::max_concurrent(&["program", "--max-concurrent", "3", "input.csv"], None, Some(3))]
    #[case::no_options(&["program", "input.csv"], None, None)]
    #[case::all_options(
        &["program", "--strategy", "async", "--batch-size", "250", "--max-concurrent", "3", "input.csv"],
        Some(250),
        Some(3)
    )]
    fn test_batch_options(
        #[case] args: &[&str],
        #[case] batch_size: Option<usize>,
        #[case] max_concurrent: Option<usize>,
    ) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.batch_size, batch_size);
        assert_eq!(parsed.max_concurrent, max_concurrent);
    }

    #[rstest]
    #[case::all_defaults(&["program", "input.csv"], 1000, num_cpus::get())]
    #[case::custom_batch_size(&["program", "--batch-size", "250", "input.csv"], 250, num_cpus::get())]
    #[case::custom_max_concurrent(&["program", "--max-concurrent", "3", "input.csv"], 1000, 3)]
    #[case::zero_batch_size(&["program", "--batch-size", "0", "input.csv"], 1000, num_cpus::get())]
    #[case::zero_max_concurrent(&["program", "--max-concurrent", "0", "input.csv"], 1000, num_cpus::get())]
    fn test_batch_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: usize,
        #[case] expected_max_concurrent: usize,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_batch_config();

        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent, expected_max_concurrent);
    }

    #[test]
    fn test_ledger_options() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--config",
            "ledger.toml",
            "--journal",
            "ledger.jsonl",
            "--ledger-output",
            "entries.csv",
            "--log-format",
            "json",
            "input.csv",
        ])
        .unwrap();

        assert_eq!(parsed.config, Some(PathBuf::from("ledger.toml")));
        assert_eq!(parsed.journal, Some(PathBuf::from("ledger.jsonl")));
        assert_eq!(parsed.ledger_output, Some(PathBuf::from("entries.csv")));
        assert_eq!(parsed.log_format, LogFormat::Json);
    }

    #[test]
    fn test_ledger_options_default_to_none() {
        let parsed = CliArgs::try_parse_from(["program", "input.csv"]).unwrap();

        assert_eq!(parsed.config, None);
        assert_eq!(parsed.journal, None);
        assert_eq!(parsed.ledger_output, None);
        assert_eq!(parsed.log_format, LogFormat::Text);
    }

    #[rstest]
    #[case::missing_input(&["program"])]
    #[case::invalid_strategy(&["program", "--strategy", "invalid", "input.csv"])]
    #[case::invalid_log_format(&["program", "--log-format", "xml", "input.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
