//! Thread-safe account storage with per-account mutual exclusion
//!
//! # Design
//!
//! Accounts are stored in a `DashMap` of `Arc<Mutex<Account>>`. The map is
//! only touched long enough to clone the `Arc` out, so no map shard lock is
//! ever held while an account lock is taken. Balance-affecting operations on
//! one account serialize on its mutex; operations touching several accounts
//! acquire every mutex in ascending-id order, which makes lock cycles (two
//! transfers crossing in opposite directions) impossible.
//!
//! # Bounded acquisition
//!
//! Locks are taken with `try_lock` under a capped, exponentially backed-off
//! retry budget. An account contended past the budget surfaces
//! `TransientConflict` (retryable) instead of blocking the caller
//! indefinitely; a poisoned lock surfaces `StoreUnavailable`.
//!
//! # Versioning
//!
//! Every account carries a monotonic `version`. A successful multi-account
//! commit bumps the version of each participating account; a failed closure
//! bumps nothing.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use dashmap::DashMap;

use crate::types::{Account, AccountId, LedgerError};

/// Default number of `try_lock` attempts before giving up
const DEFAULT_LOCK_ATTEMPTS: u32 = 64;

/// Default initial backoff between attempts
const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_micros(50);

/// Backoff ceiling
const MAX_LOCK_BACKOFF: Duration = Duration::from_millis(5);

/// Concurrent account store
///
/// The ledger engine is the sole writer. Readers get snapshots; writers get
/// exclusive access through [`AccountStore::with_accounts`].
pub struct AccountStore {
    /// Account id to lock-wrapped account state
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,

    /// Acquisition attempts before `TransientConflict`
    lock_attempts: u32,

    /// Initial inter-attempt backoff (doubled up to `MAX_LOCK_BACKOFF`)
    lock_backoff: Duration,
}

impl AccountStore {
    /// Create an empty store with the default lock budget
    pub fn new() -> Self {
        Self::with_lock_budget(DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF)
    }

    /// Create an empty store with an explicit lock budget
    ///
    /// Mostly useful in tests, where a tiny budget makes the
    /// `TransientConflict` path observable without long waits.
    pub fn with_lock_budget(lock_attempts: u32, lock_backoff: Duration) -> Self {
        AccountStore {
            accounts: DashMap::new(),
            lock_attempts: lock_attempts.max(1),
            lock_backoff,
        }
    }

    /// Register a new account
    ///
    /// Fails with a validation error if the id is already present; account
    /// ids are never reused.
    pub fn open(&self, account: Account) -> Result<(), LedgerError> {
        let id = account.id;
        let mut inserted = false;
        self.accounts.entry(id).or_insert_with(|| {
            inserted = true;
            Arc::new(Mutex::new(account))
        });
        if inserted {
            Ok(())
        } else {
            Err(LedgerError::validation(format!(
                "account {id} already exists"
            )))
        }
    }

    /// Whether an account exists
    pub fn contains(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    /// Point-in-time copy of an account
    pub fn snapshot(&self, id: &AccountId) -> Result<Account, LedgerError> {
        let handle = self.handle(id)?;
        let guard = self.acquire(id, &handle)?;
        Ok(guard.clone())
    }

    /// Snapshots of all accounts, sorted by id for deterministic output
    pub fn all(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .filter_map(|entry| entry.value().lock().ok().map(|guard| guard.clone()))
            .collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    /// Run `f` with exclusive access to every listed account
    ///
    /// Ids are deduplicated and locked in ascending order regardless of the
    /// order given — the one rule that holds everywhere two accounts are
    /// touched. On success the version of each locked account is bumped; on
    /// failure nothing is, and `f` must not have mutated (check first, then
    /// apply).
    pub fn with_accounts<T>(
        &self,
        ids: &[AccountId],
        f: impl FnOnce(&mut LockedAccounts<'_, '_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut ordered: Vec<AccountId> = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        // Clone the Arc handles out first so no map shard lock is held
        // while account mutexes are being acquired.
        let handles: Vec<(AccountId, Arc<Mutex<Account>>)> = ordered
            .iter()
            .map(|id| Ok((*id, self.handle(id)?)))
            .collect::<Result<_, LedgerError>>()?;

        let mut guards: Vec<(AccountId, MutexGuard<'_, Account>)> =
            Vec::with_capacity(handles.len());
        for (id, handle) in &handles {
            guards.push((*id, self.acquire(id, handle)?));
        }

        let mut locked = LockedAccounts {
            guards: &mut guards,
        };
        let out = f(&mut locked)?;

        for (_, guard) in guards.iter_mut() {
            guard.version += 1;
        }
        Ok(out)
    }

    /// Single-account convenience over [`AccountStore::with_accounts`]
    pub fn with_account<T>(
        &self,
        id: &AccountId,
        f: impl FnOnce(&mut Account) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.with_accounts(&[*id], |locked| f(locked.get_mut(id)?))
    }

    fn handle(&self, id: &AccountId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::AccountNotFound { account: *id })
    }

    fn acquire<'a>(
        &self,
        id: &AccountId,
        handle: &'a Mutex<Account>,
    ) -> Result<MutexGuard<'a, Account>, LedgerError> {
        let mut backoff = self.lock_backoff;
        for attempt in 0..self.lock_attempts {
            match handle.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {
                    if attempt + 1 < self.lock_attempts {
                        std::thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_LOCK_BACKOFF);
                    }
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(LedgerError::store_unavailable(format!(
                        "account lock poisoned for {id}"
                    )))
                }
            }
        }
        Err(LedgerError::TransientConflict {
            account: *id,
            attempts: self.lock_attempts,
        })
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive view over the accounts locked by one commit
pub struct LockedAccounts<'g, 'a> {
    guards: &'g mut Vec<(AccountId, MutexGuard<'a, Account>)>,
}

impl LockedAccounts<'_, '_> {
    /// Immutable access to one of the locked accounts
    pub fn get(&self, id: &AccountId) -> Result<&Account, LedgerError> {
        self.guards
            .iter()
            .find(|(gid, _)| gid == id)
            .map(|(_, guard)| &**guard)
            .ok_or(LedgerError::AccountNotFound { account: *id })
    }

    /// Mutable access to one of the locked accounts
    pub fn get_mut(&mut self, id: &AccountId) -> Result<&mut Account, LedgerError> {
        self.guards
            .iter_mut()
            .find(|(gid, _)| gid == id)
            .map(|(_, guard)| &mut **guard)
            .ok_or(LedgerError::AccountNotFound { account: *id })
    }
}
