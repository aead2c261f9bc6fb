//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `account`: wallet account state, spend windows, status
//! - `transaction`: transaction records, kinds, statuses, fees, disputes
//! - `error`: the `LedgerError` taxonomy
//! - `event`: domain events emitted after commit

pub mod account;
pub mod error;
pub mod event;
pub mod transaction;

pub use account::{Account, AccountStatus, SpendWindow};
pub use error::LedgerError;
pub use event::LedgerEvent;
pub use transaction::{
    DisputeRecord, Fees, Transaction, TransactionFilter, TransactionKind, TransactionStatus,
};

use uuid::Uuid;

/// Wallet account identifier
///
/// Opaque and stable for the lifetime of the account. Generated once at
/// account creation; never reused.
pub type AccountId = Uuid;

/// Identifier of the user or merchant that owns an account
pub type OwnerId = Uuid;

/// Transaction identifier
///
/// Globally unique and externally referenceable (e.g. by a payment
/// processor's reconciliation file).
pub type TransactionId = Uuid;

/// Amount expressed in minor currency units (e.g. cents)
///
/// All balance arithmetic is exact integer arithmetic on minor units.
/// Negative values never appear in committed state; the signed type exists
/// so that intermediate checked arithmetic can detect underflow.
pub type MinorUnits = i64;
