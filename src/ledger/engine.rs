//! Ledger engine
//!
//! Orchestrates every balance mutation: limit checks, fee computation,
//! transaction record creation, the atomic commit against the account
//! store, and post-commit event emission. The engine is the sole writer of
//! `Account.balance` and `Transaction.status`.
//!
//! # Commit discipline
//!
//! Every operation follows the same shape:
//!
//! 1. validate inputs (pure; rejected before any store access)
//! 2. create the transaction record `Pending`, advance it to `Processing`
//! 3. under the account lock(s): *check everything, then apply everything* —
//!    new balances are computed with checked arithmetic before a single
//!    field is assigned, so a failed precondition mutates nothing
//! 4. on success: advance the record to `Completed` with its balance
//!    snapshots, settle the idempotency key, dispatch the event
//! 5. on failure: advance the record to `Failed` (no balance was touched)
//!    and return the typed error
//!
//! Idempotent operations reserve their key *before* step 2, recording the
//! transaction id up front; a concurrent duplicate therefore returns the
//! winner's transaction even while the winner is mid-commit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::ledger::fees::FeeSchedule;
use crate::ledger::lifecycle;
use crate::notify::NotificationDispatcher;
use crate::store::{
    AccountStore, IdempotencyRegistry, IdempotentOutcome, Reservation, TransactionStore,
};
use crate::types::{
    Account, AccountId, AccountStatus, DisputeRecord, Fees, LedgerError, LedgerEvent, MinorUnits,
    OwnerId, Transaction, TransactionFilter, TransactionId, TransactionKind, TransactionStatus,
};

/// Engine-wide policy knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minor-unit currency code stamped on new accounts
    pub currency: String,

    /// Daily spend limit for newly opened accounts, in minor units
    pub default_daily_limit: MinorUnits,

    /// Monthly spend limit for newly opened accounts, in minor units
    pub default_monthly_limit: MinorUnits,

    /// How long after completion a payment stays disputable
    pub dispute_window: Duration,

    /// How long idempotency keys stay live
    pub idempotency_ttl: Duration,

    /// Fee policy for payments
    pub fee_schedule: FeeSchedule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            currency: "CLX".to_string(),
            default_daily_limit: 50_000,
            default_monthly_limit: 200_000,
            dispute_window: Duration::days(7),
            idempotency_ttl: Duration::hours(48),
            fee_schedule: FeeSchedule::default(),
        }
    }
}

/// Settlement callback from the payment processor
///
/// Consumed idempotently: duplicate callbacks for the same key are expected
/// and harmless.
#[derive(Debug, Clone)]
pub struct SettlementNotice {
    /// Idempotency key, derived from the processor's payment reference
    pub idempotency_key: String,

    /// Processor-side reference, kept on the transaction record
    pub external_reference: String,

    /// Wallet being settled
    pub account: AccountId,

    /// Settled amount in minor units
    pub amount: MinorUnits,

    /// How the processor says the payment ended
    pub outcome: SettlementOutcome,
}

/// Processor-reported settlement result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Funds captured; credit the wallet
    Succeeded,

    /// Payment failed upstream; record the failure, move no funds
    Failed,
}

/// The wallet ledger and transaction engine
pub struct LedgerEngine {
    accounts: AccountStore,
    transactions: TransactionStore,
    idempotency: IdempotencyRegistry,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    platform_account: AccountId,
}

impl LedgerEngine {
    /// Create an engine with its own stores and the platform fee account
    ///
    /// The platform fee ledger is an ordinary internal account subject to
    /// every account invariant; payment fees accumulate on it and cashback
    /// is funded from it.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let accounts = AccountStore::new();
        let now = clock.now();
        let platform = Account::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            config.currency.clone(),
            MinorUnits::MAX,
            MinorUnits::MAX,
            now,
        );
        let platform_account = platform.id;
        // A freshly generated UUID cannot collide in an empty store.
        if accounts.open(platform).is_err() {
            unreachable!("platform account id collided in empty store");
        }

        LedgerEngine {
            accounts,
            transactions: TransactionStore::new(),
            idempotency: IdempotencyRegistry::new(config.idempotency_ttl),
            dispatcher: NotificationDispatcher::new(),
            clock,
            config,
            platform_account,
        }
    }

    /// The internal platform fee account
    pub fn platform_account(&self) -> AccountId {
        self.platform_account
    }

    /// Subscribe to committed events involving `account`
    pub fn subscribe(
        &self,
        account: AccountId,
    ) -> tokio::sync::mpsc::UnboundedReceiver<LedgerEvent> {
        self.dispatcher.subscribe(account)
    }

    // ------------------------------------------------------------------
    // Account surface
    // ------------------------------------------------------------------

    /// Open a wallet for `owner` with the default limits
    pub fn open_account(&self, owner: OwnerId) -> Result<Account, LedgerError> {
        self.open_account_with_limits(
            owner,
            self.config.default_daily_limit,
            self.config.default_monthly_limit,
        )
    }

    /// Open a wallet with explicit limits
    pub fn open_account_with_limits(
        &self,
        owner: OwnerId,
        daily_limit: MinorUnits,
        monthly_limit: MinorUnits,
    ) -> Result<Account, LedgerError> {
        if daily_limit < 0 || monthly_limit < 0 {
            return Err(LedgerError::validation("limits must be non-negative"));
        }
        let account = Account::new(
            Uuid::new_v4(),
            owner,
            self.config.currency.clone(),
            daily_limit,
            monthly_limit,
            self.clock.now(),
        );
        self.accounts.open(account.clone())?;
        Ok(account)
    }

    /// Register a pre-existing account (reconciliation bootstrap)
    ///
    /// Lets the replay surface seed balances captured elsewhere. Rejects
    /// negative balances; everything after seeding goes through the normal
    /// operations.
    pub fn seed_account(&self, account: Account) -> Result<(), LedgerError> {
        if account.balance < 0 {
            return Err(LedgerError::validation(format!(
                "seed balance for {} is negative",
                account.id
            )));
        }
        self.accounts.open(account)
    }

    /// Change an account's status
    ///
    /// `Closed` is terminal: a closed account cannot be reopened.
    pub fn set_account_status(
        &self,
        id: &AccountId,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        self.accounts.with_account(id, |account| {
            if account.status == AccountStatus::Closed {
                return Err(LedgerError::AccountClosed { account: account.id });
            }
            account.status = status;
            Ok(account.clone())
        })
    }

    /// Current balance in minor units
    pub fn balance(&self, id: &AccountId) -> Result<MinorUnits, LedgerError> {
        Ok(self.accounts.snapshot(id)?.balance)
    }

    /// Snapshot of one account
    pub fn account(&self, id: &AccountId) -> Result<Account, LedgerError> {
        self.accounts.snapshot(id)
    }

    /// Snapshots of every account, sorted by id
    pub fn accounts_snapshot(&self) -> Vec<Account> {
        self.accounts.all()
    }

    /// Look up one transaction
    pub fn transaction(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.transactions.require(id)
    }

    /// List transactions involving `account`, newest first
    pub fn transactions(
        &self,
        account: &AccountId,
        filter: &TransactionFilter,
    ) -> Vec<Transaction> {
        self.transactions.list_for(account, filter)
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    /// Credit `amount` to a wallet
    ///
    /// With an idempotency key the credit is applied at most once: replays
    /// return the recorded outcome, whatever it was, without touching the
    /// balance again.
    pub fn topup(
        &self,
        account: &AccountId,
        amount: MinorUnits,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        self.credit_from_outside(
            account,
            amount,
            idempotency_key,
            None,
            TransactionKind::Topup,
            "topup",
        )
    }

    /// Debit `payer`, credit `merchant` net of `fee`, credit the platform
    /// fee account
    ///
    /// `fee` is the catalog-supplied merchant commission in minor units; the
    /// schedule may add a platform surcharge on top. Both components land on
    /// the platform fee account. The payer's daily and monthly windows are
    /// rolled and checked in the same commit that moves the money.
    pub fn pay(
        &self,
        payer: &AccountId,
        merchant: &AccountId,
        amount: MinorUnits,
        fee: MinorUnits,
        category: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        Self::ensure_positive(amount)?;
        if fee < 0 || fee > amount {
            return Err(LedgerError::validation(format!(
                "fee {fee} outside [0, {amount}]"
            )));
        }
        if payer == merchant {
            return Err(LedgerError::validation("payer and merchant must differ"));
        }
        if *payer == self.platform_account || *merchant == self.platform_account {
            return Err(LedgerError::validation(
                "the platform fee account cannot take part in payments",
            ));
        }
        let fees = self.config.fee_schedule.breakdown(amount, fee);
        if fees.total > amount {
            return Err(LedgerError::validation(format!(
                "total fees {} exceed amount {amount}",
                fees.total
            )));
        }

        let now = self.clock.now();
        let tx_id = Uuid::new_v4();
        if let Some(key) = idempotency_key {
            if let Reservation::Replayed(record) = self.idempotency.reserve(key, tx_id, now) {
                debug!(key, transaction = %record.transaction_id, "replaying payment outcome");
                return self.transactions.require(&record.transaction_id);
            }
        }

        let record = self.new_record(
            tx_id,
            Some(*payer),
            Some(*merchant),
            amount,
            TransactionKind::Payment,
            category.unwrap_or("general"),
            fees,
            idempotency_key,
            None,
            None,
            now,
        );
        self.transactions.insert(record)?;
        self.start_processing(&tx_id, now)?;

        let platform = self.platform_account;
        let net = amount - fees.total;
        let commit = self
            .accounts
            .with_accounts(&[*payer, *merchant, platform], |locked| {
                // Check phase: compute every new balance before assigning any.
                let payer_acc = locked.get(payer)?;
                payer_acc.ensure_open()?;
                let payer_before = payer_acc.balance;
                let payer_after = payer_acc.debited(amount)?;
                let (daily, monthly) = payer_acc.spend_windows_after(amount, now)?;
                let payer_currency = payer_acc.currency.clone();

                let merchant_acc = locked.get(merchant)?;
                merchant_acc.ensure_open()?;
                if merchant_acc.currency != payer_currency {
                    return Err(LedgerError::validation("currency mismatch"));
                }
                let merchant_after = merchant_acc.credited(net)?;
                let platform_after = locked.get(&platform)?.credited(fees.total)?;

                // Apply phase: plain assignments, nothing can fail.
                let payer_acc = locked.get_mut(payer)?;
                payer_acc.balance = payer_after;
                payer_acc.daily = daily;
                payer_acc.monthly = monthly;
                locked.get_mut(merchant)?.balance = merchant_after;
                locked.get_mut(&platform)?.balance = platform_after;
                Ok((payer_before, payer_after))
            });

        self.finish(&tx_id, idempotency_key, commit, now)
    }

    /// Move `amount` between two wallets
    ///
    /// The two accounts are locked in ascending-id order (like every
    /// multi-account commit), so transfers crossing in opposite directions
    /// cannot deadlock.
    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: MinorUnits,
    ) -> Result<Transaction, LedgerError> {
        Self::ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::validation("cannot transfer to the same account"));
        }
        if *from == self.platform_account || *to == self.platform_account {
            return Err(LedgerError::validation(
                "the platform fee account cannot take part in transfers",
            ));
        }

        let now = self.clock.now();
        let tx_id = Uuid::new_v4();
        let record = self.new_record(
            tx_id,
            Some(*from),
            Some(*to),
            amount,
            TransactionKind::Transfer,
            "transfer",
            Fees::none(),
            None,
            None,
            None,
            now,
        );
        self.transactions.insert(record)?;
        self.start_processing(&tx_id, now)?;

        let commit = self.accounts.with_accounts(&[*from, *to], |locked| {
            let from_acc = locked.get(from)?;
            from_acc.ensure_open()?;
            let from_before = from_acc.balance;
            let from_after = from_acc.debited(amount)?;
            let from_currency = from_acc.currency.clone();

            let to_acc = locked.get(to)?;
            to_acc.ensure_open()?;
            if to_acc.currency != from_currency {
                return Err(LedgerError::validation("currency mismatch"));
            }
            let to_after = to_acc.credited(amount)?;

            locked.get_mut(from)?.balance = from_after;
            locked.get_mut(to)?.balance = to_after;
            Ok((from_before, from_after))
        });

        self.finish(&tx_id, None, commit, now)
    }

    /// Reverse a completed payment, up to its original amount
    ///
    /// The merchant is debited and the original payer credited; fees are not
    /// returned. The refundable headroom is reserved on the original record
    /// under its entry lock, so racing refunds can never jointly exceed the
    /// original amount.
    pub fn refund(
        &self,
        original: &TransactionId,
        amount: MinorUnits,
    ) -> Result<Transaction, LedgerError> {
        Self::ensure_positive(amount)?;
        let source = self.transactions.update(original, |tx| {
            if tx.status != TransactionStatus::Completed {
                return Err(LedgerError::OriginalNotCompleted {
                    original: tx.id,
                    status: tx.status,
                });
            }
            Self::reserve_refund(tx, amount)?;
            Ok(tx.clone())
        })?;
        self.execute_refund(&source, amount)
    }

    /// Claim `amount` of refundable headroom on `tx` (caller holds its lock)
    fn reserve_refund(tx: &mut Transaction, amount: MinorUnits) -> Result<(), LedgerError> {
        if tx.kind != TransactionKind::Payment {
            return Err(LedgerError::validation(format!(
                "only payments are refundable, {} is a {:?}",
                tx.id, tx.kind
            )));
        }
        if tx.from.is_none() || tx.to.is_none() {
            return Err(LedgerError::validation(format!(
                "payment {} has no refundable parties",
                tx.id
            )));
        }
        if tx.refunded_amount + amount > tx.amount {
            return Err(LedgerError::RefundExceedsOriginal {
                original: tx.id,
                original_amount: tx.amount,
                already_refunded: tx.refunded_amount,
                requested: amount,
            });
        }
        tx.refunded_amount += amount;
        Ok(())
    }

    /// Give reserved headroom back after a failed refund commit
    fn unreserve_refund(&self, original: &TransactionId, amount: MinorUnits) {
        let released = self.transactions.update(original, |tx| {
            tx.refunded_amount -= amount;
            Ok(())
        });
        if let Err(err) = released {
            warn!(transaction = %original, error = %err, "failed to release refund reservation");
        }
    }

    /// Move a reserved refund: debit the merchant, credit the payer
    fn execute_refund(
        &self,
        source: &Transaction,
        amount: MinorUnits,
    ) -> Result<Transaction, LedgerError> {
        let (payer, merchant) = match (source.from, source.to) {
            (Some(payer), Some(merchant)) => (payer, merchant),
            _ => {
                // reserve_refund already verified the parties.
                return Err(LedgerError::validation(format!(
                    "payment {} has no refundable parties",
                    source.id
                )));
            }
        };

        let now = self.clock.now();
        let tx_id = Uuid::new_v4();
        let record = self.new_record(
            tx_id,
            Some(merchant),
            Some(payer),
            amount,
            TransactionKind::Refund,
            "refund",
            Fees::none(),
            None,
            None,
            Some(source.id),
            now,
        );
        self.transactions.insert(record)?;
        self.start_processing(&tx_id, now)?;

        let commit = self.accounts.with_accounts(&[merchant, payer], |locked| {
            let merchant_acc = locked.get(&merchant)?;
            merchant_acc.ensure_open()?;
            let merchant_after = merchant_acc.debited(amount)?;

            let payer_acc = locked.get(&payer)?;
            payer_acc.ensure_open()?;
            let payer_before = payer_acc.balance;
            let payer_after = payer_acc.credited(amount)?;

            locked.get_mut(&merchant)?.balance = merchant_after;
            locked.get_mut(&payer)?.balance = payer_after;
            // Snapshots track the credited payer: the account the refund is for.
            Ok((payer_before, payer_after))
        });

        let outcome = self.finish(&tx_id, None, commit, now);
        if outcome.is_err() {
            self.unreserve_refund(&source.id, amount);
        }
        outcome
    }

    /// Open a dispute on a completed payment
    ///
    /// Only legal within the dispute window (7 days by default) from
    /// completion.
    pub fn dispute(
        &self,
        transaction: &TransactionId,
        reason: &str,
        description: &str,
    ) -> Result<DisputeRecord, LedgerError> {
        let now = self.clock.now();
        let window = self.config.dispute_window;
        self.transactions.update(transaction, |tx| {
            if tx.status == TransactionStatus::Completed {
                if let Some(completed_at) = tx.completed_at {
                    let deadline = completed_at + window;
                    if now > deadline {
                        return Err(LedgerError::DisputeWindowExpired {
                            transaction: tx.id,
                            deadline,
                        });
                    }
                }
            }
            lifecycle::advance(tx, TransactionStatus::Disputed, now)?;
            let record = DisputeRecord {
                reason: reason.to_string(),
                description: description.to_string(),
                opened_at: now,
                resolved_at: None,
            };
            tx.dispute = Some(record.clone());
            Ok(record)
        })
    }

    /// Resolve an open dispute
    ///
    /// Upheld: the remaining (un-refunded) amount flows back to the payer
    /// and the transaction ends `Refunded`. Rejected: the transaction
    /// returns to `Completed`. If the refund commit fails (merchant funds),
    /// the dispute stays open.
    pub fn resolve_dispute(
        &self,
        transaction: &TransactionId,
        upheld: bool,
    ) -> Result<Transaction, LedgerError> {
        let now = self.clock.now();

        // Gate: claim the open dispute atomically so concurrent resolvers
        // cannot both act on it.
        let source = self.transactions.update(transaction, |tx| {
            if tx.status != TransactionStatus::Disputed {
                return Err(LedgerError::InvalidStateTransition {
                    transaction: tx.id,
                    from: tx.status,
                    to: if upheld {
                        TransactionStatus::Refunded
                    } else {
                        TransactionStatus::Completed
                    },
                });
            }
            let dispute = tx
                .dispute
                .as_mut()
                .ok_or_else(|| LedgerError::validation("disputed transaction has no dispute record"))?;
            if dispute.resolved_at.is_some() {
                return Err(LedgerError::validation("dispute already being resolved"));
            }
            dispute.resolved_at = Some(now);
            Ok(tx.clone())
        })?;

        if !upheld {
            return self.transactions.update(transaction, |tx| {
                lifecycle::advance(tx, TransactionStatus::Completed, now)?;
                Ok(tx.clone())
            });
        }

        // Plain refunds are blocked while the status is Disputed, so the
        // headroom observed at the gate is still accurate here.
        let remaining = source.amount - source.refunded_amount;
        if remaining > 0 {
            let refunded = self
                .transactions
                .update(transaction, |tx| Self::reserve_refund(tx, remaining))
                .and_then(|_| self.execute_refund(&source, remaining));
            if let Err(err) = refunded {
                // Reopen the dispute; the value has not moved.
                self.transactions
                    .update(transaction, |tx| {
                        if let Some(dispute) = tx.dispute.as_mut() {
                            dispute.resolved_at = None;
                        }
                        Ok(())
                    })
                    .unwrap_or_else(|reopen| {
                        warn!(transaction = %source.id, error = %reopen, "failed to reopen dispute")
                    });
                return Err(err);
            }
        }

        self.transactions.update(transaction, |tx| {
            lifecycle::advance(tx, TransactionStatus::Refunded, now)?;
            Ok(tx.clone())
        })
    }

    /// Platform-funded reward credit
    pub fn cashback(
        &self,
        account: &AccountId,
        amount: MinorUnits,
        category: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        Self::ensure_positive(amount)?;
        if *account == self.platform_account {
            return Err(LedgerError::validation(
                "cashback target cannot be the platform fee account",
            ));
        }

        let now = self.clock.now();
        let tx_id = Uuid::new_v4();
        let platform = self.platform_account;
        let record = self.new_record(
            tx_id,
            Some(platform),
            Some(*account),
            amount,
            TransactionKind::Cashback,
            category.unwrap_or("cashback"),
            Fees::none(),
            None,
            None,
            None,
            now,
        );
        self.transactions.insert(record)?;
        self.start_processing(&tx_id, now)?;

        let commit = self.accounts.with_accounts(&[platform, *account], |locked| {
            let platform_after = locked.get(&platform)?.debited(amount)?;
            let target = locked.get(account)?;
            target.ensure_open()?;
            let before = target.balance;
            let after = target.credited(amount)?;

            locked.get_mut(&platform)?.balance = platform_after;
            locked.get_mut(account)?.balance = after;
            Ok((before, after))
        });

        self.finish(&tx_id, None, commit, now)
    }

    /// Abandon a transaction that has not yet moved money
    ///
    /// Legal only from `Pending`/`Processing`; a committed mutation can only
    /// be reversed by [`LedgerEngine::refund`].
    pub fn cancel(&self, transaction: &TransactionId) -> Result<Transaction, LedgerError> {
        let now = self.clock.now();
        self.transactions.update(transaction, |tx| {
            lifecycle::advance(tx, TransactionStatus::Cancelled, now)?;
            Ok(tx.clone())
        })
    }

    /// Consume a payment-processor settlement callback idempotently
    ///
    /// Successful settlements credit the wallet exactly once per key;
    /// failed ones record a `Failed` transaction and move nothing. Duplicate
    /// callbacks replay the recorded outcome either way.
    pub fn apply_settlement(&self, notice: &SettlementNotice) -> Result<Transaction, LedgerError> {
        match notice.outcome {
            SettlementOutcome::Succeeded => self.credit_from_outside(
                &notice.account,
                notice.amount,
                Some(&notice.idempotency_key),
                Some(&notice.external_reference),
                TransactionKind::Topup,
                "settlement",
            ),
            SettlementOutcome::Failed => {
                Self::ensure_positive(notice.amount)?;
                let now = self.clock.now();
                let tx_id = Uuid::new_v4();
                if let Reservation::Replayed(record) =
                    self.idempotency.reserve(&notice.idempotency_key, tx_id, now)
                {
                    return self.transactions.require(&record.transaction_id);
                }
                let record = self.new_record(
                    tx_id,
                    None,
                    Some(notice.account),
                    notice.amount,
                    TransactionKind::Topup,
                    "settlement",
                    Fees::none(),
                    Some(&notice.idempotency_key),
                    Some(&notice.external_reference),
                    None,
                    now,
                );
                self.transactions.insert(record)?;
                self.start_processing(&tx_id, now)?;
                let tx = self.transactions.update(&tx_id, |tx| {
                    lifecycle::advance(tx, TransactionStatus::Failed, now)?;
                    Ok(tx.clone())
                })?;
                self.idempotency
                    .complete(&notice.idempotency_key, IdempotentOutcome::Failed);
                Ok(tx)
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn credit_from_outside(
        &self,
        account: &AccountId,
        amount: MinorUnits,
        idempotency_key: Option<&str>,
        external_reference: Option<&str>,
        kind: TransactionKind,
        category: &str,
    ) -> Result<Transaction, LedgerError> {
        Self::ensure_positive(amount)?;

        let now = self.clock.now();
        let tx_id = Uuid::new_v4();
        if let Some(key) = idempotency_key {
            if let Reservation::Replayed(record) = self.idempotency.reserve(key, tx_id, now) {
                debug!(key, transaction = %record.transaction_id, "replaying settlement outcome");
                return self.transactions.require(&record.transaction_id);
            }
        }

        let record = self.new_record(
            tx_id,
            None,
            Some(*account),
            amount,
            kind,
            category,
            Fees::none(),
            idempotency_key,
            external_reference,
            None,
            now,
        );
        self.transactions.insert(record)?;
        self.start_processing(&tx_id, now)?;

        let commit = self.accounts.with_account(account, |acc| {
            acc.ensure_open()?;
            let before = acc.balance;
            let after = acc.credited(amount)?;
            acc.balance = after;
            Ok((before, after))
        });

        self.finish(&tx_id, idempotency_key, commit, now)
    }

    fn new_record(
        &self,
        id: TransactionId,
        from: Option<AccountId>,
        to: Option<AccountId>,
        amount: MinorUnits,
        kind: TransactionKind,
        category: &str,
        fees: Fees,
        idempotency_key: Option<&str>,
        external_reference: Option<&str>,
        original: Option<TransactionId>,
        now: DateTime<Utc>,
    ) -> Transaction {
        Transaction {
            id,
            from,
            to,
            amount,
            kind,
            category: category.to_string(),
            status: TransactionStatus::Pending,
            balance_before: 0,
            balance_after: 0,
            fees,
            refunded_amount: 0,
            idempotency_key: idempotency_key.map(str::to_string),
            external_reference: external_reference.map(str::to_string),
            original,
            created_at: now,
            completed_at: None,
            failed_at: None,
            dispute: None,
        }
    }

    fn start_processing(&self, tx_id: &TransactionId, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.transactions.update(tx_id, |tx| {
            lifecycle::advance(tx, TransactionStatus::Processing, now)
        })
    }

    /// Close out a commit attempt: record the outcome, settle the key,
    /// publish the event
    fn finish(
        &self,
        tx_id: &TransactionId,
        idempotency_key: Option<&str>,
        commit: Result<(MinorUnits, MinorUnits), LedgerError>,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        match commit {
            Ok((before, after)) => {
                let tx = self.transactions.update(tx_id, |tx| {
                    lifecycle::advance(tx, TransactionStatus::Completed, now)?;
                    tx.balance_before = before;
                    tx.balance_after = after;
                    Ok(tx.clone())
                })?;
                if let Some(key) = idempotency_key {
                    self.idempotency.complete(key, IdempotentOutcome::Completed);
                }
                // Emission strictly after commit; a dead subscriber cannot
                // roll the ledger back.
                self.dispatcher.dispatch(&tx);
                Ok(tx)
            }
            Err(err) if matches!(err, LedgerError::TransientConflict { .. } | LedgerError::StoreUnavailable { .. }) => {
                // Infrastructure fault: no verdict was reached. Free the key
                // so a retry executes fresh, and leave the record cancelled
                // rather than failed.
                if let Some(key) = idempotency_key {
                    self.idempotency.release(key);
                }
                if let Err(cancel_err) = self.transactions.update(tx_id, |tx| {
                    lifecycle::advance(tx, TransactionStatus::Cancelled, now)
                }) {
                    warn!(transaction = %tx_id, error = %cancel_err, "failed to cancel after conflict");
                }
                Err(err)
            }
            Err(err) => {
                if let Err(fail_err) = self.transactions.update(tx_id, |tx| {
                    lifecycle::advance(tx, TransactionStatus::Failed, now)
                }) {
                    warn!(transaction = %tx_id, error = %fail_err, "failed to record failure");
                }
                if let Some(key) = idempotency_key {
                    self.idempotency.complete(key, IdempotentOutcome::Failed);
                }
                Err(err)
            }
        }
    }

    fn ensure_positive(amount: MinorUnits) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }
}
