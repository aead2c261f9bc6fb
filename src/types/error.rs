//! Error types for the Collex wallet ledger
//!
//! All rejections the ledger engine can produce, with enough structured
//! context for a caller to decide whether to retry, top up, or abandon.
//!
//! # Error Categories
//!
//! - **Validation**: malformed input, rejected before any store access
//! - **Account errors**: missing, frozen, or closed accounts
//! - **Funds/limit errors**: insufficient balance, daily/monthly limits
//! - **Refund/dispute errors**: over-refunds, wrong source status, expired
//!   dispute windows
//! - **Lifecycle errors**: illegal state-machine transitions
//! - **Infrastructure errors**: bounded-retry exhaustion (`TransientConflict`,
//!   retryable) and `StoreUnavailable` (fatal to the request, not the process)

use thiserror::Error;

use super::transaction::TransactionStatus;
use super::{AccountId, MinorUnits, TransactionId};

/// Main error type for ledger operations
///
/// Every variant except `StoreUnavailable` is recovered at the engine
/// boundary and returned as a typed outcome; none of them leaves an account
/// or transaction in a partially applied state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Malformed input rejected before reaching any store
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// No account exists under the given id
    #[error("account {account} not found")]
    AccountNotFound {
        /// The unknown account id
        account: AccountId,
    },

    /// The account is frozen and rejects mutation
    #[error("account {account} is frozen")]
    AccountFrozen {
        /// The frozen account
        account: AccountId,
    },

    /// The account is closed and rejects mutation
    #[error("account {account} is closed")]
    AccountClosed {
        /// The closed account
        account: AccountId,
    },

    /// The debit would drive the balance negative
    #[error("insufficient balance on {account}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Account that lacks funds
        account: AccountId,
        /// Current balance in minor units
        available: MinorUnits,
        /// Amount that was requested
        requested: MinorUnits,
    },

    /// The spend would exceed the daily limit for the current window
    #[error("daily limit exceeded on {account}: spent {spent} of {limit}, requested {requested}")]
    DailyLimitExceeded {
        /// Account at its limit
        account: AccountId,
        /// Spend already counted in the current window
        spent: MinorUnits,
        /// The daily limit
        limit: MinorUnits,
        /// Amount that was requested
        requested: MinorUnits,
    },

    /// The spend would exceed the monthly limit for the current window
    #[error("monthly limit exceeded on {account}: spent {spent} of {limit}, requested {requested}")]
    MonthlyLimitExceeded {
        /// Account at its limit
        account: AccountId,
        /// Spend already counted in the current window
        spent: MinorUnits,
        /// The monthly limit
        limit: MinorUnits,
        /// Amount that was requested
        requested: MinorUnits,
    },

    /// Cumulative refunds would exceed the original payment
    #[error("refund of {requested} exceeds original {original_amount} on {original} (already refunded {already_refunded})")]
    RefundExceedsOriginal {
        /// The payment being refunded
        original: TransactionId,
        /// Its original amount
        original_amount: MinorUnits,
        /// Total already refunded against it
        already_refunded: MinorUnits,
        /// The refund that was requested
        requested: MinorUnits,
    },

    /// The refund source is not in a successfully completed state
    #[error("transaction {original} is {status:?}, not completed; cannot refund")]
    OriginalNotCompleted {
        /// The transaction that was referenced
        original: TransactionId,
        /// Its current status
        status: TransactionStatus,
    },

    /// The dispute window (7 days from completion) has closed
    #[error("dispute window for {transaction} expired at {deadline}")]
    DisputeWindowExpired {
        /// The transaction that can no longer be disputed
        transaction: TransactionId,
        /// End of its dispute window
        deadline: chrono::DateTime<chrono::Utc>,
    },

    /// A state-machine transition that the lifecycle rules forbid
    #[error("illegal transition for {transaction}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// The transaction whose transition was rejected
        transaction: TransactionId,
        /// Status it is in
        from: TransactionStatus,
        /// Status that was requested
        to: TransactionStatus,
    },

    /// No transaction exists under the given id
    #[error("transaction {transaction} not found")]
    TransactionNotFound {
        /// The unknown transaction id
        transaction: TransactionId,
    },

    /// Contention on an account outlasted the bounded retry budget
    ///
    /// Retryable: the caller may re-issue the request.
    #[error("transient conflict on {account} after {attempts} attempts")]
    TransientConflict {
        /// The contended account
        account: AccountId,
        /// How many acquisition attempts were made
        attempts: u32,
    },

    /// The backing store is unusable (e.g. poisoned lock)
    ///
    /// Fatal to the request, not to the process.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the fault
        message: String,
    },

    /// Checked minor-unit arithmetic overflowed
    #[error("amount overflow in {operation} on {account}")]
    AmountOverflow {
        /// Operation that overflowed
        operation: &'static str,
        /// Account involved
        account: AccountId,
    },
}

impl LedgerError {
    /// Create a `Validation` error
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    /// Create a `StoreUnavailable` error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        LedgerError::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Whether the caller may usefully retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    #[case::validation(
        LedgerError::validation("amount must be positive"),
        "validation failed: amount must be positive"
    )]
    #[case::store(
        LedgerError::store_unavailable("lock poisoned"),
        "store unavailable: lock poisoned"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_insufficient_balance_display_carries_amounts() {
        let account = Uuid::nil();
        let error = LedgerError::InsufficientBalance {
            account,
            available: 100,
            requested: 150,
        };
        assert_eq!(
            error.to_string(),
            format!("insufficient balance on {account}: available 100, requested 150")
        );
    }

    #[test]
    fn test_only_transient_conflict_is_retryable() {
        assert!(LedgerError::TransientConflict {
            account: Uuid::nil(),
            attempts: 8
        }
        .is_retryable());
        assert!(!LedgerError::validation("nope").is_retryable());
        assert!(!LedgerError::store_unavailable("down").is_retryable());
    }
}
