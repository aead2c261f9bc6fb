//! Transaction-related types for the Collex wallet ledger
//!
//! Defines the transaction record, its kind and status enums, the fee
//! breakdown attached to payments, and the dispute record carried by
//! disputed transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, MinorUnits, TransactionId};

/// Kinds of transactions the ledger records
///
/// Every balance-affecting operation produces exactly one record of one of
/// these kinds. There is deliberately no withdrawal kind: value leaves the
/// system only through fee collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// External settlement crediting a wallet
    Topup,

    /// Wallet-to-merchant payment, net of fees
    Payment,

    /// Peer-to-peer transfer between wallets
    Transfer,

    /// Reversal of a completed payment, up to its original amount
    Refund,

    /// Platform-funded reward credit
    Cashback,
}

/// Lifecycle status of a transaction record
///
/// Transitions are governed by the state machine in `ledger::lifecycle`;
/// they only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Created, preconditions not yet checked
    Pending,

    /// Preconditions passed; balance commit in flight (or awaiting external
    /// settlement)
    Processing,

    /// Balance mutation committed
    Completed,

    /// A precondition failed; no balance mutation was applied
    Failed,

    /// Abandoned before any balance mutation
    Cancelled,

    /// A completed transaction under dispute
    Disputed,

    /// A dispute was upheld and the value returned
    Refunded,
}

impl TransactionStatus {
    /// Whether no further transition can leave this status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Cancelled | TransactionStatus::Refunded
        )
    }
}

/// Fee breakdown for a payment
///
/// `merchant_fee` is the commission charged to the merchant and
/// `platform_fee` an optional platform surcharge; both are credited to the
/// platform fee account, so `total` is the amount that leaves the merchant's
/// net credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fees {
    /// Commission charged to the merchant, in minor units
    pub merchant_fee: MinorUnits,

    /// Platform surcharge, in minor units
    pub platform_fee: MinorUnits,

    /// Sum of all fee components
    pub total: MinorUnits,
}

impl Fees {
    /// No fees (top-ups, transfers, refunds, cashback)
    pub fn none() -> Self {
        Fees::default()
    }
}

/// Dispute details attached to a disputed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeRecord {
    /// Short machine-friendly reason code supplied by the caller
    pub reason: String,

    /// Free-form description
    pub description: String,

    /// When the dispute was opened
    pub opened_at: DateTime<Utc>,

    /// When the dispute was resolved (upheld or rejected), if it has been
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A single ledger transaction
///
/// The pair (mutated account row, transaction row) is the unit of atomicity:
/// `balance_before`/`balance_after` are snapshots of the mutated account
/// taken from the same commit that moved the money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique identifier
    pub id: TransactionId,

    /// Debited account; `None` for top-ups (value enters from outside)
    pub from: Option<AccountId>,

    /// Credited account (merchant account for payments)
    pub to: Option<AccountId>,

    /// Positive amount in minor units
    pub amount: MinorUnits,

    /// What kind of operation produced this record
    pub kind: TransactionKind,

    /// Spending category (free-form; "general" when the caller has none)
    pub category: String,

    /// Current lifecycle status
    pub status: TransactionStatus,

    /// Balance of the mutated account immediately before the commit
    ///
    /// For debits (payment, transfer) this is the payer's balance; for
    /// credits (top-up, refund, cashback) the receiving account's.
    pub balance_before: MinorUnits,

    /// Balance of the mutated account immediately after the commit
    ///
    /// Invariant: `balance_after == balance_before ± amount`.
    pub balance_after: MinorUnits,

    /// Fee breakdown; zero for everything but payments
    pub fees: Fees,

    /// Cumulative amount committed (or reserved) by refunds against this
    /// payment
    ///
    /// Maintained under this record's entry lock, which is what makes the
    /// "refunds never exceed the original" rule hold under concurrency.
    pub refunded_amount: MinorUnits,

    /// Idempotency key, when the operation was externally initiated
    pub idempotency_key: Option<String>,

    /// Processor-side reference for settlements
    pub external_reference: Option<String>,

    /// For refunds, the transaction being reversed
    pub original: Option<TransactionId>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Set when the transaction enters `Completed`
    pub completed_at: Option<DateTime<Utc>>,

    /// Set when the transaction enters `Failed`
    pub failed_at: Option<DateTime<Utc>>,

    /// Dispute details, present once the transaction has been disputed
    pub dispute: Option<DisputeRecord>,
}

impl Transaction {
    /// Whether `account` is a party to this transaction
    pub fn involves(&self, account: &AccountId) -> bool {
        self.from.as_ref() == Some(account) || self.to.as_ref() == Some(account)
    }
}

/// Filters for listing an account's transactions
///
/// All fields are optional and combined conjunctively. Results are ordered
/// newest first.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Restrict to a single kind
    pub kind: Option<TransactionKind>,

    /// Restrict to a single status
    pub status: Option<TransactionStatus>,

    /// Only transactions created at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Only transactions created before this instant
    pub until: Option<DateTime<Utc>>,

    /// Maximum number of results
    pub limit: Option<usize>,
}

impl TransactionFilter {
    /// Whether `tx` passes every set filter
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(kind) = self.kind {
            if tx.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if tx.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if tx.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if tx.created_at >= until {
                return false;
            }
        }
        true
    }
}
