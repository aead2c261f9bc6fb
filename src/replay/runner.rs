//! Replay runner
//!
//! Drives an operations file through a shared [`LedgerEngine`]:
//!
//! 1. batches are read sequentially, so file order is preserved across
//!    batches
//! 2. within a batch, operations are partitioned by account (refunds by
//!    their original payment) and each partition runs as its own tokio
//!    task — different accounts in parallel, one account strictly in order
//! 3. rejected operations are logged and counted, never fatal; only I/O
//!    failures abort the replay
//!
//! The replay path is a trusted reconciliation surface and bypasses the
//! request limiter; idempotency keys carried by the rows make re-running a
//! half-applied file safe.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::{LedgerEngine, SettlementNotice, SettlementOutcome};
use crate::types::{LedgerError, Transaction};

use super::csv_format::Operation;
use super::reader::AsyncOpsReader;

/// Fatal replay failures
///
/// Everything else (rejected payments, unknown accounts, over-refunds) is
/// recorded in the summary and logged.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The operations file could not be read
    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning for the replay pipeline
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Operations per batch
    pub batch_size: usize,

    /// Worker parallelism hint (threads for the runtime)
    pub max_concurrent: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            batch_size: 1000,
            max_concurrent: num_cpus::get(),
        }
    }
}

impl ReplayConfig {
    /// Create a config, falling back to defaults on zero values
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        let default = Self::default();
        let batch_size = if batch_size == 0 {
            warn!(batch_size, "invalid batch size, using default");
            default.batch_size
        } else {
            batch_size
        };
        let max_concurrent = if max_concurrent == 0 {
            warn!(max_concurrent, "invalid concurrency, using default");
            default.max_concurrent
        } else {
            max_concurrent
        };
        ReplayConfig {
            batch_size,
            max_concurrent,
        }
    }
}

/// What a replay run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Rows successfully converted and attempted
    pub processed: u64,

    /// Operations that committed (including idempotent replays)
    pub applied: u64,

    /// Operations the engine rejected
    pub rejected: u64,
}

/// Replays an operations file against a shared engine
pub struct ReplayRunner {
    engine: Arc<LedgerEngine>,
    config: ReplayConfig,
}

impl ReplayRunner {
    /// Create a runner over `engine`
    pub fn new(engine: Arc<LedgerEngine>, config: ReplayConfig) -> Self {
        ReplayRunner { engine, config }
    }

    /// Replay the file at `ops_path`
    pub async fn run(&self, ops_path: &Path) -> Result<ReplaySummary, ReplayError> {
        let file = tokio::fs::File::open(ops_path).await?;
        let mut reader = AsyncOpsReader::new(file.compat());
        let mut summary = ReplaySummary::default();

        loop {
            let batch = reader.read_batch(self.config.batch_size).await;
            if batch.is_empty() {
                break;
            }
            let (applied, rejected) = self.process_batch(batch).await;
            summary.processed += applied + rejected;
            summary.applied += applied;
            summary.rejected += rejected;
        }

        info!(
            processed = summary.processed,
            applied = summary.applied,
            rejected = summary.rejected,
            "replay finished"
        );
        Ok(summary)
    }

    /// Process one batch with account-based partitioning
    ///
    /// Returns `(applied, rejected)` counts.
    async fn process_batch(&self, batch: Vec<Operation>) -> (u64, u64) {
        let mut partitions: HashMap<Uuid, Vec<Operation>> = HashMap::new();
        for operation in batch {
            partitions
                .entry(operation.partition_key())
                .or_default()
                .push(operation);
        }

        let mut tasks = Vec::with_capacity(partitions.len());
        for (_, operations) in partitions {
            let engine = Arc::clone(&self.engine);
            tasks.push(tokio::spawn(async move {
                let mut applied = 0u64;
                let mut rejected = 0u64;
                for operation in operations {
                    match apply_operation(&engine, &operation) {
                        Ok(tx) => {
                            debug!(transaction = %tx.id, status = ?tx.status, "applied");
                            applied += 1;
                        }
                        Err(error) => {
                            warn!(%error, ?operation, "operation rejected");
                            rejected += 1;
                        }
                    }
                }
                (applied, rejected)
            }));
        }

        let mut applied = 0u64;
        let mut rejected = 0u64;
        for task in tasks {
            match task.await {
                Ok((a, r)) => {
                    applied += a;
                    rejected += r;
                }
                Err(error) => warn!(%error, "partition task panicked"),
            }
        }
        (applied, rejected)
    }
}

/// Dispatch one operation to the engine
fn apply_operation(
    engine: &LedgerEngine,
    operation: &Operation,
) -> Result<Transaction, LedgerError> {
    match operation {
        Operation::Topup {
            account,
            amount,
            key,
        } => engine.topup(account, *amount, key.as_deref()),
        Operation::Pay {
            payer,
            merchant,
            amount,
            fee,
            category,
            key,
        } => engine.pay(
            payer,
            merchant,
            *amount,
            *fee,
            category.as_deref(),
            key.as_deref(),
        ),
        Operation::Transfer { from, to, amount } => engine.transfer(from, to, *amount),
        Operation::Refund { original, amount } => engine.refund(original, *amount),
        Operation::Cashback {
            account,
            amount,
            category,
        } => engine.cashback(account, *amount, category.as_deref()),
        Operation::SettleOk {
            account,
            amount,
            key,
            reference,
        } => engine.apply_settlement(&SettlementNotice {
            idempotency_key: key.clone(),
            external_reference: reference.clone(),
            account: *account,
            amount: *amount,
            outcome: SettlementOutcome::Succeeded,
        }),
        Operation::SettleFail {
            account,
            amount,
            key,
            reference,
        } => engine.apply_settlement(&SettlementNotice {
            idempotency_key: key.clone(),
            external_reference: reference.clone(),
            account: *account,
            amount: *amount,
            outcome: SettlementOutcome::Failed,
        }),
    }
}
