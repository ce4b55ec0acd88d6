//! Venue-agnostic gateway trait.
//!
//! The scanner, entry policy and exit evaluator only ever talk to the venue through
//! [`MarketDataGateway`], so the live REST client, the paper-trading wrapper and the
//! in-memory mock are interchangeable.

use super::types::{MarketSnapshot, OrderBook, OrderRequest, OrderResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

/// Trading mode of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Real orders against the venue.
    Live,
    /// Real market data, simulated fills.
    Paper,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Live => write!(f, "LIVE"),
            TradingMode::Paper => write!(f, "PAPER"),
        }
    }
}

/// Market data and order capability of a prediction-market venue.
///
/// Read calls return `Err` for transport failures and `Ok(None)` when the venue has no
/// data for the requested id. Order placement never errors: `None` means the order
/// was not confirmed.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Fetch up to `limit` markets.
    async fn list_markets(&self, limit: usize, active_only: bool)
        -> anyhow::Result<Vec<MarketSnapshot>>;

    /// Fetch a single market by id.
    async fn get_market(&self, market_id: &str) -> anyhow::Result<Option<MarketSnapshot>>;

    /// Fetch the order book of one outcome token.
    async fn get_order_book(&self, token_id: &str) -> anyhow::Result<Option<OrderBook>>;

    /// Fetch the bid/ask midpoint of one outcome token.
    async fn get_midpoint(&self, token_id: &str) -> anyhow::Result<Option<Decimal>>;

    /// Place a limit order.
    async fn place_order(&self, order: &OrderRequest) -> Option<OrderResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_mode_display() {
        assert_eq!(TradingMode::Live.to_string(), "LIVE");
        assert_eq!(TradingMode::Paper.to_string(), "PAPER");
    }
}
