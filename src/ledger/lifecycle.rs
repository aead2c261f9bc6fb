//! Transaction state machine
//!
//! Transitions only ever move forward:
//!
//! ```text
//! Pending ──► Processing ──► Completed ──► Disputed ──► Refunded
//!    │             │              ▲            │
//!    │             ├──► Failed    └────────────┘ (dispute rejected)
//!    └─────────────┴──► Cancelled
//! ```
//!
//! `Cancelled` is reachable only while no balance mutation has been applied
//! (`Pending`/`Processing`); once a commit exists, only a refund reverses
//! it. `Failed` is reachable only from `Processing`: failure is derived from
//! the precondition check itself, never from after-the-fact cleanup.
//!
//! Illegal transitions fail with `InvalidStateTransition` and are logged at
//! WARN; they are never silently ignored.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{LedgerError, Transaction, TransactionStatus};

/// Whether the state machine permits `from -> to`
pub fn permitted(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Cancelled)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled)
            | (Completed, Disputed)
            | (Disputed, Completed)
            | (Disputed, Refunded)
    )
}

/// Advance `tx` to `to`, stamping lifecycle timestamps
///
/// The caller holds the record's entry lock, so the check-then-set pair is
/// atomic with respect to other writers.
pub fn advance(
    tx: &mut Transaction,
    to: TransactionStatus,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    if !permitted(tx.status, to) {
        warn!(
            transaction = %tx.id,
            from = ?tx.status,
            to = ?to,
            "rejected illegal transaction transition"
        );
        return Err(LedgerError::InvalidStateTransition {
            transaction: tx.id,
            from: tx.status,
            to,
        });
    }

    match to {
        TransactionStatus::Completed => {
            // Re-entry from Disputed keeps the original completion time.
            if tx.completed_at.is_none() {
                tx.completed_at = Some(now);
            }
        }
        TransactionStatus::Failed => tx.failed_at = Some(now),
        _ => {}
    }
    tx.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fees, TransactionKind};
    use rstest::rstest;
    use uuid::Uuid;

    fn tx_in(status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            from: None,
            to: Some(Uuid::new_v4()),
            amount: 100,
            kind: TransactionKind::Topup,
            category: "general".to_string(),
            status,
            balance_before: 0,
            balance_after: 0,
            fees: Fees::none(),
            refunded_amount: 0,
            idempotency_key: None,
            external_reference: None,
            original: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            dispute: None,
        }
    }

    #[rstest]
    #[case::starts(TransactionStatus::Pending, TransactionStatus::Processing)]
    #[case::completes(TransactionStatus::Processing, TransactionStatus::Completed)]
    #[case::fails(TransactionStatus::Processing, TransactionStatus::Failed)]
    #[case::cancel_pending(TransactionStatus::Pending, TransactionStatus::Cancelled)]
    #[case::cancel_processing(TransactionStatus::Processing, TransactionStatus::Cancelled)]
    #[case::disputes(TransactionStatus::Completed, TransactionStatus::Disputed)]
    #[case::dispute_rejected(TransactionStatus::Disputed, TransactionStatus::Completed)]
    #[case::dispute_upheld(TransactionStatus::Disputed, TransactionStatus::Refunded)]
    fn test_legal_transitions(#[case] from: TransactionStatus, #[case] to: TransactionStatus) {
        assert!(permitted(from, to));
        let mut tx = tx_in(from);
        advance(&mut tx, to, Utc::now()).expect("legal transition");
        assert_eq!(tx.status, to);
    }

    #[rstest]
    #[case::no_skip(TransactionStatus::Pending, TransactionStatus::Completed)]
    #[case::no_backwards(TransactionStatus::Completed, TransactionStatus::Processing)]
    #[case::no_cancel_after_commit(TransactionStatus::Completed, TransactionStatus::Cancelled)]
    #[case::no_dispute_of_failed(TransactionStatus::Failed, TransactionStatus::Disputed)]
    #[case::no_refund_without_dispute(TransactionStatus::Completed, TransactionStatus::Refunded)]
    #[case::terminal_failed(TransactionStatus::Failed, TransactionStatus::Processing)]
    #[case::terminal_cancelled(TransactionStatus::Cancelled, TransactionStatus::Processing)]
    #[case::terminal_refunded(TransactionStatus::Refunded, TransactionStatus::Completed)]
    fn test_illegal_transitions(#[case] from: TransactionStatus, #[case] to: TransactionStatus) {
        assert!(!permitted(from, to));
        let mut tx = tx_in(from);
        let err = advance(&mut tx, to, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
        assert_eq!(tx.status, from);
    }

    #[test]
    fn test_completion_timestamp_is_stamped_once() {
        let mut tx = tx_in(TransactionStatus::Processing);
        let first = Utc::now();
        advance(&mut tx, TransactionStatus::Completed, first).expect("complete");
        assert_eq!(tx.completed_at, Some(first));

        // Dispute round-trip must not move the completion time.
        advance(&mut tx, TransactionStatus::Disputed, Utc::now()).expect("dispute");
        advance(&mut tx, TransactionStatus::Completed, Utc::now()).expect("reject dispute");
        assert_eq!(tx.completed_at, Some(first));
    }

    #[test]
    fn test_failure_timestamp_stamped() {
        let mut tx = tx_in(TransactionStatus::Processing);
        let now = Utc::now();
        advance(&mut tx, TransactionStatus::Failed, now).expect("fail");
        assert_eq!(tx.failed_at, Some(now));
        assert_eq!(tx.completed_at, None);
    }
}
