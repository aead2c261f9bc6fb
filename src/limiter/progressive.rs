//! Progressive rate limiting
//!
//! Wraps the sliding-window limiter with a per-identity violation counter:
//! every rejection shrinks the identity's effective cap by 20% of the base
//! (floor of one request) for a rolling 24-hour period. Violation state is
//! TTL-refreshed — each new violation restarts the 24 hours — and stored
//! without an upper bound on identities, so repeat offenders stay penalized
//! as long as they keep offending.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

use super::window::{Decision, Identity, LimiterConfig, OperationClass, SlidingWindowLimiter};

/// Cap reduction per violation, in percent of the base cap
const PENALTY_PERCENT: u32 = 20;

/// How long a violation keeps counting
const PENALTY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
struct ViolationState {
    count: u32,
    last_violation: DateTime<Utc>,
}

/// Sliding-window limiter with escalating penalties
pub struct ProgressiveLimiter {
    inner: SlidingWindowLimiter,
    violations: DashMap<Identity, ViolationState>,
    clock: Arc<dyn Clock>,
}

impl ProgressiveLimiter {
    /// Create a progressive limiter with the given configuration
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        ProgressiveLimiter {
            inner: SlidingWindowLimiter::new(config, Arc::clone(&clock)),
            violations: DashMap::new(),
            clock,
        }
    }

    /// Check and count one event, applying any active penalty
    ///
    /// A rejection records a violation, shrinking the identity's cap for
    /// the next 24 hours. Exempt identities bypass counters and never
    /// accumulate violations.
    pub fn check(&self, class: OperationClass, identity: Identity) -> Decision {
        if self.inner.config().exempt.contains(&identity) {
            return self.inner.check(class, identity);
        }

        let now = self.clock.now();
        let violations = self.active_violations(&identity, now);
        let cap = self.effective_cap(class, violations);
        let decision = self.inner.check_with_cap(class, identity, cap);

        if !decision.is_allowed() {
            self.record_violation(identity, now);
        }
        decision
    }

    /// The cap `identity` currently gets for `class`
    pub fn effective_cap(&self, class: OperationClass, violations: u32) -> u32 {
        let base = self.inner.config().limit_for(class).max_events;
        let percent = 100u32.saturating_sub(PENALTY_PERCENT.saturating_mul(violations));
        (base * percent / 100).max(1)
    }

    /// Violations still counting against `identity`
    pub fn active_violations(&self, identity: &Identity, now: DateTime<Utc>) -> u32 {
        // Copy the state out before touching the map again; removing while
        // a read guard is live would deadlock on the shard.
        let state = match self.violations.get(identity) {
            Some(entry) => *entry.value(),
            None => return 0,
        };
        if state.last_violation + Duration::hours(PENALTY_WINDOW_HOURS) > now {
            state.count
        } else {
            // Penalty lapsed; forget the identity lazily.
            self.violations.remove(identity);
            0
        }
    }

    fn record_violation(&self, identity: Identity, now: DateTime<Utc>) {
        let mut state = self.violations.entry(identity).or_insert(ViolationState {
            count: 0,
            last_violation: now,
        });
        state.count = state.count.saturating_add(1);
        state.last_violation = now;
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

    fn limiter() -> (ProgressiveLimiter, ManualClock) {
        let clock = ManualClock::new(start());
        let limiter = ProgressiveLimiter::new(LimiterConfig::default(), Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn drain_payment_quota(limiter: &ProgressiveLimiter, id: Identity) {
        while limiter.check(OperationClass::Payment, id).is_allowed() {}
    }

    #[test]
    fn test_effective_cap_shrinks_by_fifth_with_floor() {
        let (limiter, _clock) = limiter();
        // Payment base cap is 8.
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 0), 8);
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 1), 6); // 80%
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 2), 4); // 60%
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 3), 3); // 40%
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 4), 1); // 20%
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 5), 1); // floor
        assert_eq!(limiter.effective_cap(OperationClass::Payment, 100), 1);
    }

    #[test]
    fn test_violation_shrinks_next_window() {
        let (limiter, clock) = limiter();
        let id = Identity::Account(Uuid::new_v4());

        // Use up the full cap of 8, then violate once.
        drain_payment_quota(&limiter, id);
        assert_eq!(limiter.active_violations(&id, clock.now()), 1);

        // A fresh window offers only the shrunken cap of 6.
        clock.advance(Duration::minutes(10));
        let mut allowed = 0;
        while limiter.check(OperationClass::Payment, id).is_allowed() {
            allowed += 1;
        }
        assert_eq!(allowed, 6);
    }

    #[test]
    fn test_penalty_lapses_after_24_hours() {
        let (limiter, clock) = limiter();
        let id = Identity::Account(Uuid::new_v4());

        drain_payment_quota(&limiter, id);
        assert_eq!(limiter.active_violations(&id, clock.now()), 1);

        clock.advance(Duration::hours(24) + Duration::seconds(1));
        assert_eq!(limiter.active_violations(&id, clock.now()), 0);

        let mut allowed = 0;
        while limiter.check(OperationClass::Payment, id).is_allowed() {
            allowed += 1;
        }
        assert_eq!(allowed, 8);
    }

    #[test]
    fn test_new_violation_refreshes_ttl() {
        let (limiter, clock) = limiter();
        let id = Identity::Account(Uuid::new_v4());

        drain_payment_quota(&limiter, id);

        // 23 hours later a second violation restarts the clock.
        clock.advance(Duration::hours(23));
        drain_payment_quota(&limiter, id);
        assert_eq!(limiter.active_violations(&id, clock.now()), 2);

        // Two hours on, the first 24h mark has passed but the refreshed TTL
        // keeps both violations counting.
        clock.advance(Duration::hours(2));
        assert_eq!(limiter.active_violations(&id, clock.now()), 2);
    }

    #[test]
    fn test_exempt_identity_never_accumulates_violations() {
        let clock = ManualClock::new(start());
        let operator = Identity::Account(Uuid::new_v4());
        let mut config = LimiterConfig::default();
        config.exempt.insert(operator);
        let limiter = ProgressiveLimiter::new(config, Arc::new(clock.clone()));

        for _ in 0..50 {
            assert!(limiter.check(OperationClass::Payment, operator).is_allowed());
        }
        assert_eq!(limiter.active_violations(&operator, clock.now()), 0);
    }
}
