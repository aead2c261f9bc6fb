//! Reconciliation replay pipeline
//!
//! The payment processor delivers a daily operations file; replaying it
//! through the engine settles anything a lost callback left behind. Because
//! every settlement row carries its idempotency key, replaying a file that
//! was already (partially) applied is harmless — that is the entire point.
//!
//! # Components
//!
//! - `csv_format` - row formats, conversion to domain operations, account
//!   state output
//! - `reader` - streaming async CSV reader yielding operation batches
//! - `runner` - drives batches through a shared engine, partitioned by
//!   account so per-account ordering survives the concurrency

pub mod csv_format;
pub mod reader;
pub mod runner;

pub use csv_format::{write_accounts_csv, Operation};
pub use reader::AsyncOpsReader;
pub use runner::{ReplayConfig, ReplayError, ReplayRunner, ReplaySummary};
