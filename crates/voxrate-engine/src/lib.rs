//! Rating and debiting services for voxrate
//!
//! This crate contains the services that price calls against rating plans
//! and charge the resulting costs to account balances.
//!
//! # Architecture
//!
//! Services are generic over the storage traits from voxrate-core:
//! - Each service owns its dependencies behind `Arc`
//! - Lookups are cached in-process with moka
//! - Account mutations are serialized per account by [`locks::AccountLocks`]
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `DestinationMatcher` - Longest prefix matching with a destination cache
//! - `RatingPlanResolver` - Profile lookup with fallback subjects
//! - `IntervalSplitter` - Splits a call window into priced timespans
//! - `CostCalculator` - Increment pricing, connect fee and global rounding
//! - `BalanceEngine` - Balance debits, refunds, counters and triggers
//! - `Rater` - Facade exposing cost queries, debits and session sizing
//! - `SessionManager` - Periodic debit loop for live calls

pub mod actions;
pub mod calculator;
pub mod destinations;
pub mod ledger;
pub mod locks;
pub mod rater;
pub mod resolver;
pub mod session;
pub mod splitter;

pub use actions::{ActionExecutor, StandardActions};
pub use calculator::CostCalculator;
pub use destinations::DestinationMatcher;
pub use ledger::{BalanceEngine, DebitScope, Refund, SessionCredit};
pub use locks::AccountLocks;
pub use rater::{MaxSessionTime, Rater};
pub use resolver::{RatingPlanResolver, ResolvedPlans};
pub use session::{RefundSummary, Session, SessionEvent, SessionManager, SessionState};
pub use splitter::IntervalSplitter;

/// Engine-wide constants
pub mod constants {
    /// Source tag written with audit entries produced by rating and debits
    pub const RATER_SOURCE: &str = "rater";

    /// Source tag written with audit entries produced by action timings
    pub const SCHEDULER_SOURCE: &str = "scheduler";

    /// Capacity of the session event channel
    pub const SESSION_EVENT_BUFFER: usize = 1024;
}
