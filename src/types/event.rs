//! Domain events emitted by the ledger engine
//!
//! Exactly one event is emitted per successful mutation, after the durable
//! commit. The dispatcher consumes these; it never feeds back into the
//! ledger.

use serde::{Deserialize, Serialize};

use super::transaction::Transaction;

/// Event published to subscribers after a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A transaction committed together with its balance mutation
    Committed(Transaction),
}

impl LedgerEvent {
    /// The transaction this event describes
    pub fn transaction(&self) -> &Transaction {
        match self {
            LedgerEvent::Committed(tx) => tx,
        }
    }
}
