//! Idempotency registry
//!
//! Maps an externally supplied idempotency key (client-chosen, or derived
//! from a payment processor reference) to the outcome of the operation that
//! first consumed it. Reserve-then-execute makes retries and duplicate
//! settlement callbacks harmless: the first caller reserves the key and runs
//! the operation, every later caller gets the reserved record back and with
//! it the same transaction id.
//!
//! The reserve step is a single `DashMap` entry operation, so two identical
//! requests racing on a fresh key cannot both see "vacant".

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::types::TransactionId;

/// Outcome recorded against an idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotentOutcome {
    /// The first caller is still executing the operation
    Pending,

    /// The operation committed
    Completed,

    /// The operation failed; replays return the failed record, they do not
    /// re-execute
    Failed,
}

/// What the registry knows about one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// The transaction created by the key's first use
    pub transaction_id: TransactionId,

    /// How that operation ended (or `Pending` while in flight)
    pub outcome: IdempotentOutcome,

    /// When the key may be reused
    pub expires_at: DateTime<Utc>,
}

/// Result of attempting to reserve a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The key was unused (or expired); the caller owns the operation
    Fresh,

    /// The key was already consumed; here is what it produced
    Replayed(IdempotencyRecord),
}

/// Concurrent idempotency key registry
pub struct IdempotencyRegistry {
    entries: DashMap<String, IdempotencyRecord>,
    ttl: Duration,
}

impl IdempotencyRegistry {
    /// Create a registry whose keys expire `ttl` after reservation
    pub fn new(ttl: Duration) -> Self {
        IdempotencyRegistry {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Atomically claim `key` for a new operation, or learn its prior outcome
    ///
    /// `transaction_id` is the id the caller will use if the reservation is
    /// fresh; recording it up front is what lets a concurrent duplicate
    /// return the winner's transaction id while the winner is still
    /// executing.
    pub fn reserve(
        &self,
        key: &str,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Reservation {
        let fresh = IdempotencyRecord {
            transaction_id,
            outcome: IdempotentOutcome::Pending,
            expires_at: now + self.ttl,
        };

        // The entry guard makes the read-then-insert atomic: two identical
        // requests racing on a fresh key cannot both observe "vacant".
        let mut inserted = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            inserted = true;
            fresh.clone()
        });
        if inserted {
            return Reservation::Fresh;
        }
        if entry.expires_at <= now {
            *entry = fresh;
            Reservation::Fresh
        } else {
            Reservation::Replayed(entry.clone())
        }
    }

    /// Record how the reserved operation ended
    pub fn complete(&self, key: &str, outcome: IdempotentOutcome) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.value_mut().outcome = outcome;
        }
    }

    /// Give a reservation back without consuming the key
    ///
    /// Used when the operation died of an infrastructure fault (lock budget
    /// exhausted, store unavailable) rather than a business rejection: the
    /// caller's retry with the same key must execute fresh, not replay a
    /// verdict that was never reached.
    pub fn release(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Look up a key without reserving it
    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Drop expired records; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.expires_at > now);
        before - self.entries.len()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry() -> IdempotencyRegistry {
        IdempotencyRegistry::new(Duration::hours(48))
    }

    #[test]
    fn test_first_reservation_is_fresh() {
        let registry = registry();
        let tx = Uuid::new_v4();

        assert_eq!(registry.reserve("k1", tx, Utc::now()), Reservation::Fresh);
        let record = registry.get("k1").expect("record stored");
        assert_eq!(record.transaction_id, tx);
        assert_eq!(record.outcome, IdempotentOutcome::Pending);
    }

    #[test]
    fn test_second_reservation_replays_first_transaction_id() {
        let registry = registry();
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        let now = Utc::now();

        assert_eq!(registry.reserve("k1", winner, now), Reservation::Fresh);
        match registry.reserve("k1", loser, now) {
            Reservation::Replayed(record) => {
                // The loser learns the winner's id, even mid-flight.
                assert_eq!(record.transaction_id, winner);
                assert_eq!(record.outcome, IdempotentOutcome::Pending);
            }
            Reservation::Fresh => panic!("duplicate key must not reserve"),
        }
    }

    #[test]
    fn test_complete_updates_outcome() {
        let registry = registry();
        let tx = Uuid::new_v4();
        let now = Utc::now();

        registry.reserve("k1", tx, now);
        registry.complete("k1", IdempotentOutcome::Completed);

        match registry.reserve("k1", Uuid::new_v4(), now) {
            Reservation::Replayed(record) => {
                assert_eq!(record.outcome, IdempotentOutcome::Completed)
            }
            Reservation::Fresh => panic!("completed key must replay"),
        }
    }

    #[test]
    fn test_expired_key_can_be_reused() {
        let registry = IdempotencyRegistry::new(Duration::hours(1));
        let now = Utc::now();

        registry.reserve("k1", Uuid::new_v4(), now);
        let later = now + Duration::hours(2);
        let second = Uuid::new_v4();

        assert_eq!(registry.reserve("k1", second, later), Reservation::Fresh);
        assert_eq!(
            registry.get("k1").expect("record").transaction_id,
            second
        );
    }

    #[test]
    fn test_release_frees_the_key() {
        let registry = registry();
        let now = Utc::now();

        registry.reserve("k1", Uuid::new_v4(), now);
        registry.release("k1");

        assert!(registry.get("k1").is_none());
        assert_eq!(registry.reserve("k1", Uuid::new_v4(), now), Reservation::Fresh);
    }

    #[test]
    fn test_purge_expired() {
        let registry = IdempotencyRegistry::new(Duration::hours(1));
        let now = Utc::now();

        registry.reserve("old", Uuid::new_v4(), now - Duration::hours(3));
        registry.reserve("live", Uuid::new_v4(), now);

        assert_eq!(registry.purge_expired(now), 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("live").is_some());
    }

    #[test]
    fn test_concurrent_reservations_single_winner() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(registry());
        let now = Utc::now();
        let mut handles = Vec::new();

        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                matches!(
                    registry.reserve("contended", Uuid::new_v4(), now),
                    Reservation::Fresh
                )
            }));
        }

        let fresh_count = handles
            .into_iter()
            .map(|handle| handle.join().expect("reservation thread"))
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(fresh_count, 1);
        assert_eq!(registry.len(), 1);
    }
}
