//! Position ledger: the single source of truth for positions, trades, stored
//! opportunities and the scanner configuration singleton.
//!
//! The control loop never keeps positions in memory across cycles; every cycle
//! re-reads ACTIVE positions through [`PositionLedger`].

mod models;
mod sqlite;

pub use models::{
    ActiveSide, NewPosition, NewTrade, Position, PositionStatus, Side, StoredOpportunity, Trade,
    TradeType,
};
pub use sqlite::SqliteLedger;

use crate::config::ScannerConfig;
use crate::strategy::OpportunityScore;
use anyhow::Result;

/// Persistent store of positions and trades.
pub trait PositionLedger: Send + Sync {
    /// Load the scanner configuration, creating it with defaults if missing.
    fn load_scanner_config(&self) -> Result<ScannerConfig>;

    /// Replace the scanner configuration.
    fn save_scanner_config(&self, config: &ScannerConfig) -> Result<()>;

    /// Persist a new ACTIVE position with both legs open.
    fn create_position(&self, new: &NewPosition) -> Result<Position>;

    /// Write back every mutable field of an ACTIVE position.
    ///
    /// Returns `false` without writing when the stored position is already CLOSED or
    /// LIQUIDATED; terminal positions are never re-opened.
    fn update_position(&self, position: &Position) -> Result<bool>;

    fn get_position(&self, id: i64) -> Result<Option<Position>>;

    /// The ACTIVE position on `market_id`, if any.
    fn find_active_by_market(&self, market_id: &str) -> Result<Option<Position>>;

    /// All ACTIVE positions, oldest first.
    fn list_active(&self) -> Result<Vec<Position>>;

    fn count_active(&self) -> Result<usize> {
        Ok(self.list_active()?.len())
    }

    /// Append a trade.
    fn record_trade(&self, trade: &NewTrade) -> Result<Trade>;

    fn trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>>;

    /// Upsert stored opportunity records from a scan.
    fn record_opportunities(&self, opportunities: &[OpportunityScore]) -> Result<()>;

    /// Flag the active stored opportunity for `market_id` as traded.
    fn mark_opportunity_traded(&self, market_id: &str) -> Result<()>;

    /// Active, untraded opportunities with `score >= min_score`, best first.
    fn top_opportunities(&self, limit: usize, min_score: u8) -> Result<Vec<StoredOpportunity>>;

    /// Deactivate stored opportunities detected longer ago than `max_age`.
    fn deactivate_stale_opportunities(&self, max_age: chrono::Duration) -> Result<usize>;
}
