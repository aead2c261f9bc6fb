//! Collex ledger replay CLI
//!
//! Replays a wallet operations file (the payment processor's daily
//! reconciliation export) through the ledger engine and writes final
//! account states to stdout.
//!
//! # Usage
//!
//! ```bash
//! collex-ledger ops.csv > accounts.csv
//! collex-ledger --accounts seed.csv ops.csv > accounts.csv
//! collex-ledger --batch-size 2000 --max-concurrent 8 ops.csv > accounts.csv
//! ```
//!
//! Logging goes to stderr, controlled by `RUST_LOG` (e.g.
//! `RUST_LOG=collex_ledger=debug`).
//!
//! # Exit Codes
//!
//! - 0: success (rejected rows are reported, not fatal)
//! - 1: fatal error (missing file, unreadable seed, I/O failure)

use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use collex_ledger::cli;
use collex_ledger::clock::SystemClock;
use collex_ledger::ledger::{EngineConfig, LedgerEngine};
use collex_ledger::replay::{csv_format, ReplayRunner};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let replay_config = args.to_replay_config();
    let engine_config = EngineConfig::default();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(replay_config.max_concurrent)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Error: failed to build runtime: {error}");
            process::exit(1);
        }
    };

    let clock = Arc::new(SystemClock);
    let engine = Arc::new(LedgerEngine::new(engine_config.clone(), clock));

    // Seed accounts before replaying anything that references them.
    if let Some(seed_path) = &args.accounts {
        let now = chrono::Utc::now();
        let seeds = match csv_format::read_seed_csv(seed_path, &engine_config.currency, now) {
            Ok(seeds) => seeds,
            Err(error) => {
                eprintln!("Error: {error}");
                process::exit(1);
            }
        };
        for account in seeds {
            if let Err(error) = engine.seed_account(account) {
                eprintln!("Error: {error}");
                process::exit(1);
            }
        }
    }

    let runner = ReplayRunner::new(Arc::clone(&engine), replay_config);
    if let Err(error) = runtime.block_on(runner.run(&args.ops_file)) {
        eprintln!("Error: {error}");
        process::exit(1);
    }

    let mut stdout = std::io::stdout();
    if let Err(error) = csv_format::write_accounts_csv(&engine.accounts_snapshot(), &mut stdout) {
        eprintln!("Error: {error}");
        process::exit(1);
    }
}
