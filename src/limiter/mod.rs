//! Rate limiting for mutating wallet operations
//!
//! Consulted by the calling layer *before* an operation reaches the ledger
//! engine; a limited request never touches a store. Two variants:
//!
//! - [`window::SlidingWindowLimiter`] — plain sliding-window counters keyed
//!   by `(operation class, identity)`
//! - [`progressive::ProgressiveLimiter`] — the same windows, plus a
//!   per-identity violation counter that shrinks the effective cap by 20%
//!   per violation for a rolling 24 hours (floor of one request)
//!
//! Exempt identities (trusted operators, privileged service roles) bypass
//! all counters in both variants.

pub mod progressive;
pub mod window;

pub use progressive::ProgressiveLimiter;
pub use window::{ClassLimit, Decision, Identity, LimiterConfig, OperationClass, SlidingWindowLimiter};
