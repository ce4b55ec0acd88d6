//! Opportunity detection and entry.
//!
//! Contains the core logic for:
//! - Scoring YES/NO equilibrium deviations
//! - Bounded-parallel market scanning with short-lived caching
//! - Capital sizing and two-leg position entry

mod cache;
mod entry;
mod scanner;
pub mod score;

pub use cache::OpportunityCache;
pub use entry::{calculate_amounts, EntryOutcome, EntryPolicy};
pub use scanner::{rank, MarketScanner, ScanRequest};
pub use score::{MarketFilters, OpportunityScore, RejectReason};
