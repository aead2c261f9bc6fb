use clap::Parser;
use std::path::PathBuf;

use crate::replay::ReplayConfig;

/// Replay a wallet operations file through the ledger engine
#[derive(Parser, Debug)]
#[command(name = "collex-ledger")]
#[command(about = "Replay wallet operations with idempotent settlement", long_about = None)]
pub struct CliArgs {
    /// Input CSV file of operations to replay
    #[arg(value_name = "OPS_CSV", help = "Path to the operations CSV file")]
    pub ops_file: PathBuf,

    /// Account seed file loaded before the replay
    #[arg(
        long = "accounts",
        value_name = "SEED_CSV",
        help = "CSV of accounts to seed (account,owner,balance,daily_limit,monthly_limit,status)"
    )]
    pub accounts: Option<PathBuf>,

    /// Number of operations per batch
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Operations per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Worker parallelism
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Worker threads for the replay runtime (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,
}

impl CliArgs {
    /// Build a replay configuration from the arguments
    ///
    /// Unspecified values fall back to defaults; zeros are rejected with a
    /// logged warning inside `ReplayConfig::new`.
    pub fn to_replay_config(&self) -> ReplayConfig {
        let default = ReplayConfig::default();
        ReplayConfig::new(
            self.batch_size.unwrap_or(default.batch_size),
            self.max_concurrent.unwrap_or(default.max_concurrent),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_minimal_invocation() {
        let args = CliArgs::try_parse_from(["collex-ledger", "ops.csv"]).expect("parse");
        assert_eq!(args.ops_file, PathBuf::from("ops.csv"));
        assert!(args.accounts.is_none());
        assert!(args.batch_size.is_none());
    }

    #[rstest]
    #[case::batch_size(&["collex-ledger", "--batch-size", "2000", "ops.csv"], Some(2000), None)]
    #[case::concurrency(&["collex-ledger", "--max-concurrent", "4", "ops.csv"], None, Some(4))]
    #[case::both(
        &["collex-ledger", "--batch-size", "500", "--max-concurrent", "2", "ops.csv"],
        Some(500),
        Some(2)
    )]
    fn test_tuning_flags(
        #[case] argv: &[&str],
        #[case] batch_size: Option<usize>,
        #[case] max_concurrent: Option<usize>,
    ) {
        let args = CliArgs::try_parse_from(argv).expect("parse");
        assert_eq!(args.batch_size, batch_size);
        assert_eq!(args.max_concurrent, max_concurrent);
    }

    #[test]
    fn test_seed_file_flag() {
        let args =
            CliArgs::try_parse_from(["collex-ledger", "--accounts", "seed.csv", "ops.csv"])
                .expect("parse");
        assert_eq!(args.accounts, Some(PathBuf::from("seed.csv")));
    }

    #[test]
    fn test_missing_ops_file_is_an_error() {
        assert!(CliArgs::try_parse_from(["collex-ledger"]).is_err());
    }

    #[test]
    fn test_to_replay_config_uses_defaults() {
        let args = CliArgs::try_parse_from(["collex-ledger", "ops.csv"]).expect("parse");
        let config = args.to_replay_config();
        assert_eq!(config.batch_size, 1000);
        assert!(config.max_concurrent >= 1);
    }
}
