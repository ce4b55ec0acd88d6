//! Paper trading: real market data, simulated fills.

use super::traits::MarketDataGateway;
use super::types::*;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Wraps a data source and fills every order against its current book.
pub struct PaperGateway {
    inner: Arc<dyn MarketDataGateway>,
    order_id_counter: AtomicU64,
}

impl PaperGateway {
    pub fn new(inner: Arc<dyn MarketDataGateway>) -> Self {
        Self {
            inner,
            order_id_counter: AtomicU64::new(0),
        }
    }

    /// Touch price for `side`, falling back to the limit price without a book.
    async fn fill_price(&self, order: &OrderRequest) -> Decimal {
        let book = match self.inner.get_order_book(&order.token_id).await {
            Ok(Some(book)) => book,
            _ => return order.price,
        };
        let touch = match order.side {
            OrderSide::Buy => book.best_ask(),
            OrderSide::Sell => book.best_bid(),
        };
        touch.unwrap_or(order.price)
    }
}

#[async_trait]
impl MarketDataGateway for PaperGateway {
    async fn list_markets(&self, limit: usize, active_only: bool) -> Result<Vec<MarketSnapshot>> {
        self.inner.list_markets(limit, active_only).await
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>> {
        self.inner.get_market(market_id).await
    }

    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        self.inner.get_order_book(token_id).await
    }

    async fn get_midpoint(&self, token_id: &str) -> Result<Option<Decimal>> {
        self.inner.get_midpoint(token_id).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Option<OrderResult> {
        let price = self.fill_price(order).await;
        let order_id = self.order_id_counter.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            token_id = %order.token_id,
            side = %order.side,
            size = %order.size,
            %price,
            "[PAPER] Simulated fill"
        );

        Some(OrderResult {
            order_id: format!("paper-{}", order_id),
            token_id: order.token_id.clone(),
            side: order.side,
            size: order.size,
            price,
        })
    }
}
