//! Type definitions for Polymarket market data and orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized market listing, immutable per fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub id: String,
    pub question: String,
    pub slug: Option<String>,
    /// Outcome token ids in venue order: index 0 is YES, index 1 is NO.
    pub token_ids: Vec<String>,
    pub volume_24h: Decimal,
    pub volume_total: Decimal,
    pub liquidity: Decimal,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
}

impl MarketSnapshot {
    /// Create a snapshot with the required identity fields and zeroed metrics.
    pub fn new(id: impl Into<String>, question: impl Into<String>, token_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            slug: None,
            token_ids,
            volume_24h: Decimal::ZERO,
            volume_total: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            end_date: None,
            active: true,
        }
    }

    /// Set 24h and lifetime volume.
    pub fn with_volume(mut self, volume_24h: Decimal, volume_total: Decimal) -> Self {
        self.volume_24h = volume_24h;
        self.volume_total = volume_total;
        self
    }

    /// Set advertised liquidity.
    pub fn with_liquidity(mut self, liquidity: Decimal) -> Self {
        self.liquidity = liquidity;
        self
    }

    /// Set the resolution timestamp.
    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// The YES/NO token pair, if the market has two usable outcome tokens.
    pub fn outcome_tokens(&self) -> Option<(&str, &str)> {
        match self.token_ids.as_slice() {
            [yes, no, ..] if !yes.is_empty() && !no.is_empty() => Some((yes.as_str(), no.as_str())),
            _ => None,
        }
    }

    /// Larger of 24h and lifetime volume.
    pub fn activity_volume(&self) -> Decimal {
        self.volume_24h.max(self.volume_total)
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PriceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book for a single outcome token.
///
/// The CLOB does not promise an ordering, so books are normalized on construction:
/// bids best-first (descending) and asks best-first (ascending).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }.normalized()
    }

    /// Sort both sides best-first.
    pub fn normalized(mut self) -> Self {
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));
        self
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Summed size of the top `levels` bids and asks.
    pub fn depth(&self, levels: usize) -> Decimal {
        let bid_depth: Decimal = self.bids.iter().take(levels).map(|l| l.size).sum();
        let ask_depth: Decimal = self.asks.iter().take(levels).map(|l| l.size).sum();
        bid_depth + ask_depth
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Limit order for one outcome token.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    /// Number of outcome shares.
    pub size: Decimal,
    pub price: Decimal,
}

/// Venue confirmation of a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Decimal,
}

// ==================== Gamma API payloads ====================

/// Market as returned by the Gamma `/markets` endpoints.
///
/// Gamma encodes token ids as a JSON array inside a string and mixes string and
/// numeric encodings for volumes, so decoding is lenient.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub tokens: Vec<GammaToken>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume_24hr: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub liquidity: Decimal,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl GammaMarket {
    fn token_ids(&self) -> Vec<String> {
        if let Some(raw) = self.clob_token_ids.as_deref() {
            if let Ok(ids) = serde_json::from_str::<Vec<String>>(raw) {
                return ids;
            }
        }
        self.tokens.iter().map(|t| t.token_id.clone()).collect()
    }
}

impl From<GammaMarket> for MarketSnapshot {
    fn from(market: GammaMarket) -> Self {
        let token_ids = market.token_ids();
        let end_date = market
            .end_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            question: market.question.unwrap_or_else(|| "Unknown".to_string()),
            slug: market.slug,
            token_ids,
            volume_24h: market.volume_24hr,
            volume_total: market.volume,
            liquidity: market.liquidity,
            end_date,
            active: market.active.unwrap_or(true),
            id: market.id,
        }
    }
}

/// CLOB `/midpoint` response.
#[derive(Debug, Clone, Deserialize)]
pub struct MidpointResponse {
    #[serde(deserialize_with = "lenient_decimal")]
    pub mid: Decimal,
}

/// Accept a decimal encoded as a JSON string, number or null.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(Decimal::ZERO),
        serde_json::Value::String(s) if s.is_empty() => Ok(Decimal::ZERO),
        serde_json::Value::String(s) => Decimal::from_str(&s)
            .or_else(|_| Decimal::from_scientific(&s))
            .map_err(serde::de::Error::custom),
        serde_json::Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .map_err(serde::de::Error::custom)
        }
        other => Err(serde::de::Error::custom(format!(
            "expected decimal, got {}",
            other
        ))),
    }
}
