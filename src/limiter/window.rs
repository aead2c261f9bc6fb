//! Sliding-window rate limiter
//!
//! Counts events in a moving time interval rather than fixed buckets: each
//! `(operation class, identity)` pair keeps the timestamps of its recent
//! events; a check prunes everything older than the class window and
//! compares what is left against the cap.
//!
//! On rejection the caller gets the window's reset time (when the oldest
//! counted event leaves the window) and the remaining quota, so a
//! well-behaved client knows exactly how long to back off.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::types::AccountId;

/// Classes of rate-limited operations
///
/// Each class has an independent window and cap; identity is account-based
/// for wallet operations and IP-based for pre-authentication traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Merchant payments
    Payment,

    /// Peer transfers
    Transfer,

    /// Top-up initiation
    Topup,

    /// Dispute filing
    Dispute,

    /// Pre-authentication requests, counted per source address
    Authentication,
}

/// Who is being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// A wallet account (authenticated operations)
    Account(AccountId),

    /// A source address (unauthenticated operations)
    Ip(IpAddr),
}

/// Cap and window for one operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimit {
    /// Maximum events inside the window
    pub max_events: u32,

    /// Window length
    pub window: Duration,
}

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Payments per window
    pub payment: ClassLimit,

    /// Transfers per window
    pub transfer: ClassLimit,

    /// Top-ups per window
    pub topup: ClassLimit,

    /// Disputes per window
    pub dispute: ClassLimit,

    /// Authentication attempts per window
    pub authentication: ClassLimit,

    /// Identities that bypass all counters (trusted operators,
    /// privileged roles)
    pub exempt: HashSet<Identity>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig {
            payment: ClassLimit {
                max_events: 8,
                window: Duration::minutes(10),
            },
            transfer: ClassLimit {
                max_events: 10,
                window: Duration::minutes(10),
            },
            topup: ClassLimit {
                max_events: 20,
                window: Duration::hours(1),
            },
            dispute: ClassLimit {
                max_events: 5,
                window: Duration::hours(24),
            },
            authentication: ClassLimit {
                max_events: 10,
                window: Duration::minutes(15),
            },
            exempt: HashSet::new(),
        }
    }
}

impl LimiterConfig {
    /// The limit that applies to `class`
    pub fn limit_for(&self, class: OperationClass) -> ClassLimit {
        match class {
            OperationClass::Payment => self.payment,
            OperationClass::Transfer => self.transfer,
            OperationClass::Topup => self.topup,
            OperationClass::Dispute => self.dispute,
            OperationClass::Authentication => self.authentication,
        }
    }
}

/// Outcome of a limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed; `remaining` events left in the current window
    Allowed {
        /// Quota left after counting this event
        remaining: u32,
    },

    /// Rejected; do not invoke the ledger engine
    Limited {
        /// When the oldest counted event leaves the window
        resets_at: DateTime<Utc>,
        /// Time until then
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the operation may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Sliding-window limiter over `(operation class, identity)` pairs
pub struct SlidingWindowLimiter {
    config: LimiterConfig,
    windows: DashMap<(OperationClass, Identity), VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given configuration
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        SlidingWindowLimiter {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Check and count one event for `(class, identity)`
    ///
    /// Exempt identities always pass and are never counted.
    pub fn check(&self, class: OperationClass, identity: Identity) -> Decision {
        let limit = self.config.limit_for(class);
        self.check_with_cap(class, identity, limit.max_events)
    }

    /// Like [`SlidingWindowLimiter::check`] with an explicit cap
    ///
    /// The progressive limiter feeds shrunken caps through here.
    pub(crate) fn check_with_cap(
        &self,
        class: OperationClass,
        identity: Identity,
        cap: u32,
    ) -> Decision {
        if self.config.exempt.contains(&identity) {
            return Decision::Allowed { remaining: cap };
        }

        let limit = self.config.limit_for(class);
        let now = self.clock.now();
        let mut events = self.windows.entry((class, identity)).or_default();

        // Drop everything that slid out of the window.
        while events
            .front()
            .is_some_and(|oldest| *oldest + limit.window <= now)
        {
            events.pop_front();
        }

        if events.len() >= cap as usize {
            // Safe: cap >= 1 here, so the deque is non-empty.
            let resets_at = match events.front() {
                Some(oldest) => *oldest + limit.window,
                None => now,
            };
            return Decision::Limited {
                resets_at,
                retry_after: resets_at - now,
            };
        }

        events.push_back(now);
        Decision::Allowed {
            remaining: cap - events.len() as u32,
        }
    }

    /// Drop per-identity state with no events inside its window
    ///
    /// Housekeeping for long-running processes; correctness never depends
    /// on it because stale events are pruned on every check.
    pub fn compact(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|(class, _), events| {
            let window = self.config.limit_for(*class).window;
            events.iter().any(|event| *event + window > now)
        });
        before - self.windows.len()
    }

    /// Access to the configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
            .single()
            .expect("valid test instant")
    }

    fn limiter() -> (SlidingWindowLimiter, ManualClock) {
        let clock = ManualClock::new(start());
        let limiter = SlidingWindowLimiter::new(LimiterConfig::default(), Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn account_identity() -> Identity {
        Identity::Account(Uuid::new_v4())
    }

    #[test]
    fn test_allows_up_to_cap_then_limits() {
        let (limiter, _clock) = limiter();
        let id = account_identity();

        // Payment cap is 8 per 10 minutes.
        for i in 0..8 {
            match limiter.check(OperationClass::Payment, id) {
                Decision::Allowed { remaining } => assert_eq!(remaining, 7 - i),
                Decision::Limited { .. } => panic!("event {i} should be allowed"),
            }
        }
        assert!(!limiter.check(OperationClass::Payment, id).is_allowed());
    }

    #[test]
    fn test_limited_reports_window_reset() {
        let (limiter, clock) = limiter();
        let id = account_identity();

        for _ in 0..8 {
            limiter.check(OperationClass::Payment, id);
        }
        clock.advance(Duration::minutes(4));

        match limiter.check(OperationClass::Payment, id) {
            Decision::Limited {
                resets_at,
                retry_after,
            } => {
                // Oldest event was at t0; it leaves the window at t0+10m.
                assert_eq!(resets_at, start() + Duration::minutes(10));
                assert_eq!(retry_after, Duration::minutes(6));
            }
            Decision::Allowed { .. } => panic!("must be limited"),
        }
    }

    #[test]
    fn test_window_slides_rather_than_resets() {
        let (limiter, clock) = limiter();
        let id = account_identity();

        // Fill the cap, then move past the window: all events expire.
        for _ in 0..8 {
            limiter.check(OperationClass::Payment, id);
        }
        clock.advance(Duration::minutes(10));
        assert!(limiter.check(OperationClass::Payment, id).is_allowed());
    }

    #[test]
    fn test_classes_are_independent() {
        let (limiter, _clock) = limiter();
        let id = account_identity();

        for _ in 0..8 {
            limiter.check(OperationClass::Payment, id);
        }
        assert!(!limiter.check(OperationClass::Payment, id).is_allowed());
        // The same identity still has transfer quota.
        assert!(limiter.check(OperationClass::Transfer, id).is_allowed());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter();
        let first = account_identity();
        let second = account_identity();

        for _ in 0..8 {
            limiter.check(OperationClass::Payment, first);
        }
        assert!(!limiter.check(OperationClass::Payment, first).is_allowed());
        assert!(limiter.check(OperationClass::Payment, second).is_allowed());
    }

    #[test]
    fn test_exempt_identity_bypasses_counters() {
        let clock = ManualClock::new(start());
        let operator = account_identity();
        let mut config = LimiterConfig::default();
        config.exempt.insert(operator);
        let limiter = SlidingWindowLimiter::new(config, Arc::new(clock));

        for _ in 0..100 {
            assert!(limiter.check(OperationClass::Payment, operator).is_allowed());
        }
    }

    #[test]
    fn test_ip_identity_for_authentication() {
        let (limiter, _clock) = limiter();
        let ip = Identity::Ip("203.0.113.7".parse().expect("valid ip"));

        for _ in 0..10 {
            assert!(limiter.check(OperationClass::Authentication, ip).is_allowed());
        }
        assert!(!limiter.check(OperationClass::Authentication, ip).is_allowed());
    }

    #[test]
    fn test_compact_drops_only_stale_state() {
        let (limiter, clock) = limiter();
        let stale = account_identity();
        let live = account_identity();

        limiter.check(OperationClass::Payment, stale);
        clock.advance(Duration::minutes(11));
        limiter.check(OperationClass::Payment, live);

        assert_eq!(limiter.compact(), 1);
        // The live identity's count survived compaction.
        for _ in 0..7 {
            assert!(limiter.check(OperationClass::Payment, live).is_allowed());
        }
        assert!(!limiter.check(OperationClass::Payment, live).is_allowed());
    }
}
