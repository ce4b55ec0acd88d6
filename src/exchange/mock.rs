//! In-memory venue for tests.

use super::traits::MarketDataGateway;
use super::types::*;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Scriptable gateway: markets, books and midpoints are set by the caller, orders fill
/// immediately unless their token was marked as failing.
#[derive(Default)]
pub struct MockGateway {
    /// Keyed by market id so listing order is stable
    markets: RwLock<BTreeMap<String, MarketSnapshot>>,
    hidden_markets: RwLock<HashSet<String>>,
    books: RwLock<HashMap<String, OrderBook>>,
    midpoints: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<Vec<OrderRequest>>,

    failing_books: RwLock<HashSet<String>>,
    failing_midpoints: RwLock<HashSet<String>>,
    failing_orders: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,

    order_id_counter: AtomicU64,
    list_requests: AtomicUsize,
    book_requests: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_market(&self, market: MarketSnapshot) {
        self.markets.write().await.insert(market.id.clone(), market);
    }

    /// Add a liquid two-token market `{id}` with tokens `{id}-yes` / `{id}-no` and the
    /// given best asks.
    pub async fn add_binary_market(&self, id: &str, ask_yes: Decimal, ask_no: Decimal) {
        let token_yes = format!("{}-yes", id);
        let token_no = format!("{}-no", id);

        let market = MarketSnapshot::new(id, format!("Market {}", id), vec![token_yes.clone(), token_no.clone()])
            .with_volume(dec!(20000), dec!(20000))
            .with_liquidity(dec!(3000));
        self.add_market(market).await;

        self.set_book(&token_yes, Self::book_around(ask_yes)).await;
        self.set_book(&token_no, Self::book_around(ask_no)).await;
    }

    fn book_around(ask: Decimal) -> OrderBook {
        OrderBook::new(
            vec![PriceLevel::new((ask - dec!(0.01)).max(Decimal::ZERO), dec!(600))],
            vec![PriceLevel::new(ask, dec!(600))],
        )
    }

    pub async fn set_book(&self, token_id: &str, book: OrderBook) {
        self.books.write().await.insert(token_id.to_string(), book);
    }

    pub async fn set_midpoint(&self, token_id: &str, price: Decimal) {
        self.midpoints.write().await.insert(token_id.to_string(), price);
    }

    /// Keep the market in listings but answer `get_market` with nothing.
    pub async fn hide_market_details(&self, market_id: &str) {
        self.hidden_markets.write().await.insert(market_id.to_string());
    }

    pub async fn fail_books_for(&self, token_id: &str) {
        self.failing_books.write().await.insert(token_id.to_string());
    }

    pub async fn fail_midpoint_for(&self, token_id: &str) {
        self.failing_midpoints.write().await.insert(token_id.to_string());
    }

    pub async fn fail_orders_for(&self, token_id: &str) {
        self.failing_orders.write().await.insert(token_id.to_string());
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Confirmed orders, in placement order.
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.orders.read().await.clone()
    }

    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::SeqCst)
    }

    pub fn book_requests(&self) -> usize {
        self.book_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataGateway for MockGateway {
    async fn list_markets(&self, limit: usize, active_only: bool) -> Result<Vec<MarketSnapshot>> {
        self.list_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("mock market listing unavailable");
        }

        Ok(self
            .markets
            .read()
            .await
            .values()
            .filter(|m| !active_only || m.active)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>> {
        if self.hidden_markets.read().await.contains(market_id) {
            return Ok(None);
        }
        Ok(self.markets.read().await.get(market_id).cloned())
    }

    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        self.book_requests.fetch_add(1, Ordering::SeqCst);
        if self.failing_books.read().await.contains(token_id) {
            anyhow::bail!("mock order book unavailable for {}", token_id);
        }
        Ok(self.books.read().await.get(token_id).cloned())
    }

    async fn get_midpoint(&self, token_id: &str) -> Result<Option<Decimal>> {
        if self.failing_midpoints.read().await.contains(token_id) {
            anyhow::bail!("mock midpoint unavailable for {}", token_id);
        }
        Ok(self.midpoints.read().await.get(token_id).copied())
    }

    async fn place_order(&self, order: &OrderRequest) -> Option<OrderResult> {
        if self.failing_orders.read().await.contains(&order.token_id) {
            debug!(token_id = %order.token_id, "Mock order rejected");
            return None;
        }

        let order_id = self.order_id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.orders.write().await.push(order.clone());

        Some(OrderResult {
            order_id: format!("mock-{}", order_id),
            token_id: order.token_id.clone(),
            side: order.side,
            size: order.size,
            price: order.price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_binary_market_is_listed_with_books() {
        let gateway = MockGateway::new();
        gateway.add_binary_market("b", dec!(0.45), dec!(0.50)).await;
        gateway.add_binary_market("a", dec!(0.45), dec!(0.50)).await;

        let markets = gateway.list_markets(10, true).await.unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets[0].id, "a");

        let book = gateway.get_order_book("a-yes").await.unwrap().unwrap();
        assert_eq!(book.best_ask(), Some(dec!(0.45)));
        assert_eq!(gateway.book_requests(), 1);
        assert!(gateway.get_order_book("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_order_ids_are_unique_and_failures_return_none() {
        let gateway = MockGateway::new();
        let order = OrderRequest {
            token_id: "t".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            price: dec!(0.5),
        };

        let first = gateway.place_order(&order).await.unwrap();
        let second = gateway.place_order(&order).await.unwrap();
        assert_ne!(first.order_id, second.order_id);

        gateway.fail_orders_for("t").await;
        assert!(gateway.place_order(&order).await.is_none());
        assert_eq!(gateway.placed_orders().await.len(), 2);
    }
}
