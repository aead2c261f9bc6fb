//! Transaction record storage
//!
//! Keeps every transaction the engine has created, keyed by id. Unlike the
//! account store there is no cross-record atomicity to arrange: a record is
//! only ever mutated under its own map entry lock, and only by the engine.
//!
//! The store also answers the engine's read patterns: point lookups and
//! filtered per-account listings. Cross-record invariants (cumulative
//! refunds) live on the record itself and are maintained under its entry
//! lock via [`TransactionStore::update`].

use dashmap::DashMap;

use crate::types::{AccountId, LedgerError, Transaction, TransactionFilter, TransactionId};

/// Concurrent transaction store
pub struct TransactionStore {
    /// Map of transaction id to record
    transactions: DashMap<TransactionId, Transaction>,
}

impl TransactionStore {
    /// Create an empty store
    pub fn new() -> Self {
        TransactionStore {
            transactions: DashMap::new(),
        }
    }

    /// Insert a freshly created record
    ///
    /// Ids are engine-generated UUIDs; a collision is a bug, not an input
    /// error, and is rejected rather than silently overwritten.
    pub fn insert(&self, tx: Transaction) -> Result<(), LedgerError> {
        let id = tx.id;
        let mut inserted = false;
        self.transactions.entry(id).or_insert_with(|| {
            inserted = true;
            tx
        });
        if inserted {
            Ok(())
        } else {
            Err(LedgerError::validation(format!(
                "transaction {id} already exists"
            )))
        }
    }

    /// Point-in-time copy of a record
    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.transactions.get(id).map(|entry| entry.value().clone())
    }

    /// Like [`TransactionStore::get`] but with a typed not-found error
    pub fn require(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.get(id)
            .ok_or(LedgerError::TransactionNotFound { transaction: *id })
    }

    /// Mutate a record atomically under its entry lock
    pub fn update<T>(
        &self,
        id: &TransactionId,
        f: impl FnOnce(&mut Transaction) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut entry = self
            .transactions
            .get_mut(id)
            .ok_or(LedgerError::TransactionNotFound { transaction: *id })?;
        f(entry.value_mut())
    }

    /// Transactions involving `account`, filtered, newest first
    pub fn list_for(&self, account: &AccountId, filter: &TransactionFilter) -> Vec<Transaction> {
        let mut matching: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().involves(account) && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}
