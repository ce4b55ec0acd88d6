//! Venue integrations.
//!
//! ## Polymarket
//! REST access for:
//! - Market listings and details (Gamma API)
//! - Order books and midpoints (CLOB API)
//!
//! ## Paper
//! - [`PaperGateway`] simulates fills against live books

mod client;
#[cfg(test)]
pub mod mock;
mod paper;
mod traits;
mod types;

pub use client::PolymarketClient;
#[cfg(test)]
pub use mock::MockGateway;
pub use paper::PaperGateway;
pub use traits::{MarketDataGateway, TradingMode};
pub use types::*;
