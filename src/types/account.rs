//! Account-related types for the Collex wallet ledger
//!
//! This module defines the wallet account structure, its status lifecycle,
//! and the windowed spend counters used for daily/monthly limit enforcement.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::{AccountId, MinorUnits, OwnerId};

/// Account lifecycle status
///
/// Accounts are created `Active`, may be frozen and unfrozen by an operator,
/// and are eventually transitioned to `Closed`. They are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Normal state; all operations permitted
    Active,

    /// Temporarily blocked; mutations are rejected with `AccountFrozen`
    Frozen,

    /// Terminal state; mutations are rejected with `AccountClosed`
    Closed,
}

/// A windowed spend counter: the amount spent since `window_start`
///
/// The counter is recomputed on every limit check against the current time
/// and persisted together with the mutation that triggered the check. There
/// is no background reset task; crossing the window boundary rolls the
/// counter to zero exactly once as part of the next guarded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendWindow {
    /// Amount spent within the current window, in minor units
    pub spent: MinorUnits,

    /// Instant the current window opened
    pub window_start: DateTime<Utc>,
}

impl SpendWindow {
    /// A fresh window opening at the start of `now`'s UTC day
    pub fn daily(now: DateTime<Utc>) -> Self {
        SpendWindow {
            spent: 0,
            window_start: start_of_day(now),
        }
    }

    /// A fresh window opening at the start of `now`'s UTC calendar month
    pub fn monthly(now: DateTime<Utc>) -> Self {
        SpendWindow {
            spent: 0,
            window_start: start_of_month(now),
        }
    }

    /// The window as it stands at `now`, rolling a stale daily window
    ///
    /// Returns a reset window when `now` has crossed `window_start + 1 day`,
    /// otherwise returns the window unchanged. Callers persist the result
    /// atomically with the mutation that triggered the check, so the reset
    /// is applied exactly once.
    pub fn rolled_daily(&self, now: DateTime<Utc>) -> Self {
        if now >= self.window_start + Duration::days(1) {
            SpendWindow::daily(now)
        } else {
            *self
        }
    }

    /// The window as it stands at `now`, rolling a stale monthly window
    ///
    /// Monthly windows roll on the first instant of the next calendar month,
    /// not after a fixed number of days.
    pub fn rolled_monthly(&self, now: DateTime<Utc>) -> Self {
        if start_of_month(now) > self.window_start {
            SpendWindow::monthly(now)
        } else {
            *self
        }
    }
}

fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&t.date_naive().and_time(NaiveTime::MIN))
}

fn start_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    let first = t.date_naive().with_day(1).unwrap_or(t.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// Wallet account state
///
/// Balances are integer minor units and never negative. The ledger engine
/// is the sole writer; every committed mutation increments `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque, stable account identifier
    pub id: AccountId,

    /// Owning user or merchant
    pub owner: OwnerId,

    /// Minor-unit currency code (e.g. "CLX")
    pub currency: String,

    /// Current balance in minor units; invariant: `balance >= 0`
    pub balance: MinorUnits,

    /// Spend counted against the daily limit
    pub daily: SpendWindow,

    /// Spend counted against the monthly limit
    pub monthly: SpendWindow,

    /// Maximum spend per daily window, in minor units
    pub daily_limit: MinorUnits,

    /// Maximum spend per monthly window, in minor units
    pub monthly_limit: MinorUnits,

    /// Lifecycle status
    pub status: AccountStatus,

    /// Monotonic mutation counter, incremented on every committed change
    pub version: u64,
}

impl Account {
    /// Create a new active account with a zero balance
    pub fn new(
        id: AccountId,
        owner: OwnerId,
        currency: impl Into<String>,
        daily_limit: MinorUnits,
        monthly_limit: MinorUnits,
        now: DateTime<Utc>,
    ) -> Self {
        Account {
            id,
            owner,
            currency: currency.into(),
            balance: 0,
            daily: SpendWindow::daily(now),
            monthly: SpendWindow::monthly(now),
            daily_limit,
            monthly_limit,
            status: AccountStatus::Active,
            version: 0,
        }
    }

    /// Reject mutation on frozen or closed accounts
    pub fn ensure_open(&self) -> Result<(), LedgerError> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Frozen => Err(LedgerError::AccountFrozen { account: self.id }),
            AccountStatus::Closed => Err(LedgerError::AccountClosed { account: self.id }),
        }
    }

    /// The balance after crediting `amount`, with overflow detection
    ///
    /// Pure computation; the caller assigns the result as part of its atomic
    /// commit so a failed check leaves the account untouched.
    pub fn credited(&self, amount: MinorUnits) -> Result<MinorUnits, LedgerError> {
        self.balance
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow {
                operation: "credit",
                account: self.id,
            })
    }

    /// The balance after debiting `amount`
    ///
    /// Fails with `InsufficientBalance` rather than ever producing a
    /// negative balance.
    pub fn debited(&self, amount: MinorUnits) -> Result<MinorUnits, LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: self.id,
                available: self.balance,
                requested: amount,
            });
        }
        self.balance
            .checked_sub(amount)
            .ok_or(LedgerError::AmountOverflow {
                operation: "debit",
                account: self.id,
            })
    }

    /// Daily and monthly windows rolled forward to `now`, after checking
    /// that spending `amount` stays inside both limits
    ///
    /// Returns the rolled windows with `amount` added; the caller persists
    /// them in the same commit as the balance mutation. No state is touched
    /// on failure.
    pub fn spend_windows_after(
        &self,
        amount: MinorUnits,
        now: DateTime<Utc>,
    ) -> Result<(SpendWindow, SpendWindow), LedgerError> {
        let daily = self.daily.rolled_daily(now);
        let monthly = self.monthly.rolled_monthly(now);

        if daily.spent + amount > self.daily_limit {
            return Err(LedgerError::DailyLimitExceeded {
                account: self.id,
                spent: daily.spent,
                limit: self.daily_limit,
                requested: amount,
            });
        }
        if monthly.spent + amount > self.monthly_limit {
            return Err(LedgerError::MonthlyLimitExceeded {
                account: self.id,
                spent: monthly.spent,
                limit: self.monthly_limit,
                requested: amount,
            });
        }

        Ok((
            SpendWindow {
                spent: daily.spent + amount,
                window_start: daily.window_start,
            },
            SpendWindow {
                spent: monthly.spent + amount,
                window_start: monthly.window_start,
            },
        ))
    }
}
