//! Collex Wallet Ledger
//! # Overview
//!
//! The ledger and transaction engine behind the Collex campus wallet:
//! balances are credited by external settlements, spent at merchants,
//! transferred between peers, refunded, and disputed — with no value ever
//! lost, duplicated, or driven negative, under concurrent requests and
//! untrusted retries from the payment processor.
//!
//! # Architecture
//!
//! - [`types`] - core data types (Account, Transaction, errors, events)
//! - [`clock`] - time source abstraction for deterministic windows
//! - [`store`] - the shared mutable state:
//!   - [`store::accounts`] - per-account locks, ascending-id ordering
//!   - [`store::transactions`] - transaction records
//!   - [`store::idempotency`] - idempotency key registry
//! - [`ledger`] - the engine:
//!   - [`ledger::engine`] - operation orchestration and invariants
//!   - [`ledger::lifecycle`] - the transaction state machine
//!   - [`ledger::fees`] - commission computation
//! - [`limiter`] - sliding-window and progressive rate control, consulted
//!   before the engine
//! - [`notify`] - post-commit event fan-out to subscribers
//! - [`replay`] - reconciliation replay of processor operation files
//! - [`cli`] - arguments for the replay binary
//!
//! # Operations
//!
//! [`LedgerEngine`] exposes `topup`, `pay`, `transfer`, `refund`,
//! `dispute`/`resolve_dispute`, `cashback`, `cancel`, `apply_settlement`,
//! and the read surface (`balance`, `transaction`, `transactions`). Every
//! call returns a typed outcome; rejections carry the limits and balances
//! the caller needs to decide what to do next.

pub mod cli;
pub mod clock;
pub mod ledger;
pub mod limiter;
pub mod notify;
pub mod replay;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{EngineConfig, FeeSchedule, LedgerEngine, SettlementNotice, SettlementOutcome};
pub use limiter::{
    Decision, Identity, LimiterConfig, OperationClass, ProgressiveLimiter, SlidingWindowLimiter,
};
pub use notify::NotificationDispatcher;
pub use replay::{ReplayConfig, ReplayRunner, ReplaySummary};
pub use types::{
    Account, AccountId, AccountStatus, DisputeRecord, Fees, LedgerError, LedgerEvent, MinorUnits,
    OwnerId, Transaction, TransactionFilter, TransactionId, TransactionKind, TransactionStatus,
};
