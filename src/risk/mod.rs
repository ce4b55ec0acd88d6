//! Exit management for open positions.
//!
//! Provides:
//! - Price refresh and P&L recomputation for ACTIVE positions
//! - GLOBAL (combined P&L) and INDEPENDENT (per-leg) exit decisions
//! - Full, per-leg and emergency (panic) closing

mod exit;

pub use exit::{decide, CloseReason, ExitDecision, ExitStrategyEvaluator, ExitSummary};
