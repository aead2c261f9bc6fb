//! Notification dispatcher
//!
//! Fans committed-transaction events out to interested subscribers: the
//! owning account's channel and, when a counterparty exists, its channel
//! too. Delivery is at-least-once and best-effort over unbounded tokio
//! channels; a send failure (subscriber went away) is logged and the dead
//! channel dropped — it never affects transaction status.
//!
//! Ordering: the engine calls [`NotificationDispatcher::dispatch`]
//! synchronously after each commit, so events for one account arrive in
//! commit order. Nothing is guaranteed across accounts.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{AccountId, LedgerEvent, Transaction};

/// Post-commit event fan-out
pub struct NotificationDispatcher {
    /// Account id to subscriber channel
    channels: DashMap<AccountId, mpsc::UnboundedSender<LedgerEvent>>,
}

impl NotificationDispatcher {
    /// Create a dispatcher with no subscribers
    pub fn new() -> Self {
        NotificationDispatcher {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events involving `account`
    ///
    /// A later subscription for the same account replaces the earlier one;
    /// the old receiver simply stops getting events.
    pub fn subscribe(&self, account: AccountId) -> mpsc::UnboundedReceiver<LedgerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels.insert(account, sender);
        receiver
    }

    /// Remove the subscription for `account`, if any
    pub fn unsubscribe(&self, account: &AccountId) {
        self.channels.remove(account);
    }

    /// Fan a committed transaction out to its parties
    pub fn dispatch(&self, tx: &Transaction) {
        let mut targets: Vec<AccountId> = Vec::with_capacity(2);
        if let Some(from) = tx.from {
            targets.push(from);
        }
        if let Some(to) = tx.to {
            if Some(to) != tx.from {
                targets.push(to);
            }
        }

        for account in targets {
            let Some(channel) = self.channels.get(&account) else {
                continue;
            };
            if channel.send(LedgerEvent::Committed(tx.clone())).is_err() {
                drop(channel);
                warn!(%account, transaction = %tx.id, "subscriber gone, dropping channel");
                self.channels.remove(&account);
            }
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
