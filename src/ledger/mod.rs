//! Ledger module
//!
//! The money-movement core:
//! - [`lifecycle`] — the transaction state machine
//! - [`fees`] — commission computation and the fee split
//! - [`engine`] — the orchestrator owning every balance invariant

pub mod engine;
pub mod fees;
pub mod lifecycle;

pub use engine::{
    EngineConfig, LedgerEngine, SettlementNotice, SettlementOutcome,
};
pub use fees::FeeSchedule;
