//! Polymarket REST API client.
//!
//! Market listings come from the Gamma API; order books and midpoints from the CLOB.
//! Order signing is not supported, so live order placement always reports failure.

use super::traits::MarketDataGateway;
use super::types::*;
use crate::config::VenueConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// HTTP client for the Gamma and CLOB endpoints.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    client: Client,
    gamma_url: String,
    clob_url: String,
}

impl PolymarketClient {
    /// Create a client from venue settings.
    pub fn new(config: &VenueConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            gamma_url: config.gamma_url.trim_end_matches('/').to_string(),
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `url` and decode JSON. A 404 is `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<Option<T>> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Polymarket API error {} on {}: {}", status, what, body);
        }

        let data = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))?;
        Ok(Some(data))
    }
}

#[async_trait]
impl MarketDataGateway for PolymarketClient {
    #[instrument(skip(self), name = "pm_list_markets")]
    async fn list_markets(&self, limit: usize, active_only: bool) -> Result<Vec<MarketSnapshot>> {
        let url = format!("{}/markets", self.gamma_url);
        let limit = limit.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if active_only {
            query.push(("active", "true"));
            query.push(("closed", "false"));
        }

        let markets: Vec<GammaMarket> = self
            .get_json(&url, &query, "markets")
            .await?
            .unwrap_or_default();

        let snapshots: Vec<MarketSnapshot> = markets.into_iter().map(MarketSnapshot::from).collect();
        debug!("Fetched {} markets from Gamma", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self), name = "pm_get_market")]
    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>> {
        let url = format!("{}/markets/{}", self.gamma_url, urlencoding::encode(market_id));
        let market: Option<GammaMarket> = self.get_json(&url, &[], "market").await?;
        Ok(market.map(MarketSnapshot::from))
    }

    #[instrument(skip(self), name = "pm_get_order_book")]
    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        let url = format!("{}/book", self.clob_url);
        let book: Option<OrderBook> = self
            .get_json(&url, &[("token_id", token_id)], "book")
            .await?;
        Ok(book.map(OrderBook::normalized))
    }

    #[instrument(skip(self), name = "pm_get_midpoint")]
    async fn get_midpoint(&self, token_id: &str) -> Result<Option<Decimal>> {
        let url = format!("{}/midpoint", self.clob_url);
        let mid: Option<MidpointResponse> = self
            .get_json(&url, &[("token_id", token_id)], "midpoint")
            .await?;
        Ok(mid.map(|m| m.mid).filter(|m| *m > Decimal::ZERO))
    }

    async fn place_order(&self, order: &OrderRequest) -> Option<OrderResult> {
        warn!(
            token_id = %order.token_id,
            side = %order.side,
            size = %order.size,
            price = %order.price,
            "Live order placement requires wallet signing, which is not configured"
        );
        None
    }
}
