//! Storage layer for the ledger
//!
//! The only shared mutable state in the system lives here:
//!
//! - [`accounts::AccountStore`] — wallet accounts behind per-account locks,
//!   acquired in ascending-id order for multi-account commits
//! - [`transactions::TransactionStore`] — every transaction record
//! - [`idempotency::IdempotencyRegistry`] — externally supplied idempotency
//!   keys mapped to the outcome that first consumed them
//!
//! All three are `DashMap`-backed and safe to share across request handlers.
//! The ledger engine is their sole writer.

pub mod accounts;
pub mod idempotency;
pub mod transactions;

pub use accounts::{AccountStore, LockedAccounts};
pub use idempotency::{IdempotencyRecord, IdempotencyRegistry, IdempotentOutcome, Reservation};
pub use transactions::TransactionStore;
