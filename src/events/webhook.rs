//! Discord-compatible webhook alerts.

use super::Notifier;
use crate::strategy::OpportunityScore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const COLOR_RED: u32 = 0xE74C3C;
const COLOR_ORANGE: u32 = 0xE67E22;
const COLOR_GREEN: u32 = 0x2ECC71;

/// Posts one embed per opportunity to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Embed colour by score band.
    pub fn embed_color(score: u8) -> u32 {
        match score {
            9.. => COLOR_RED,
            7..=8 => COLOR_ORANGE,
            _ => COLOR_GREEN,
        }
    }

    /// Webhook body for one opportunity.
    pub fn payload(opportunity: &OpportunityScore) -> Value {
        let link = match &opportunity.slug {
            Some(slug) => format!("https://polymarket.com/event/{}", slug),
            None => format!("https://polymarket.com/market/{}", opportunity.market_id),
        };

        json!({
            "embeds": [{
                "title": format!("Equilibrium opportunity: {}", opportunity.market_name),
                "url": link,
                "color": Self::embed_color(opportunity.total_score),
                "fields": [
                    { "name": "Score", "value": format!("{}/10", opportunity.total_score), "inline": true },
                    { "name": "Divergence", "value": format!("{:.2}%", opportunity.spread_percent), "inline": true },
                    { "name": "Net profit", "value": format!("{:.4}", opportunity.estimated_net_profit), "inline": true },
                    { "name": "YES", "value": format!("{:.3}", opportunity.price_yes), "inline": true },
                    { "name": "NO", "value": format!("{:.3}", opportunity.price_no), "inline": true },
                    { "name": "Total cost", "value": format!("{:.3}", opportunity.total_cost()), "inline": true },
                ],
                "timestamp": Utc::now().to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, opportunity), fields(market_id = %opportunity.market_id))]
    async fn notify_opportunity(&self, opportunity: &OpportunityScore) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(opportunity))
            .send()
            .await
            .context("Failed to send webhook")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook error {}: {}", status, body);
        }

        debug!(score = opportunity.total_score, "Opportunity alert sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MarketSnapshot, OrderBook, PriceLevel};
    use crate::strategy::score::analyze;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Profitable market (asks sum to 0.95) with `depth` shares on each book.
    fn opportunity_with_depth(depth: Decimal) -> OpportunityScore {
        let mut market = MarketSnapshot::new("m1", "Will it rain?", vec!["y".into(), "n".into()]);
        market.slug = Some("will-it-rain".to_string());
        let yes = OrderBook::new(vec![], vec![PriceLevel::new(dec!(0.45), depth)]);
        let no = OrderBook::new(vec![], vec![PriceLevel::new(dec!(0.50), depth)]);
        analyze(&market, Some(&yes), Some(&no), Utc::now()).unwrap()
    }

    fn opportunity() -> OpportunityScore {
        opportunity_with_depth(dec!(600))
    }

    #[test]
    fn test_embed_color_bands() {
        assert_eq!(WebhookNotifier::embed_color(10), COLOR_RED);
        assert_eq!(WebhookNotifier::embed_color(9), COLOR_RED);
        assert_eq!(WebhookNotifier::embed_color(7), COLOR_ORANGE);
        assert_eq!(WebhookNotifier::embed_color(6), COLOR_GREEN);
    }

    #[test]
    fn test_payload_fields() {
        let opp = opportunity();
        let payload = WebhookNotifier::payload(&opp);
        let embed = &payload["embeds"][0];

        assert_eq!(opp.total_score, 10);
        assert_eq!(embed["url"], "https://polymarket.com/event/will-it-rain");
        assert_eq!(embed["color"], COLOR_RED);
        assert_eq!(embed["fields"][0]["value"], format!("{}/10", opp.total_score));
        assert_eq!(embed["fields"][5]["value"], "0.950");
    }

    #[test]
    fn test_thin_book_profit_alert_is_orange() {
        // 20 shares of depth caps the profit override at 8
        let opp = opportunity_with_depth(dec!(10));
        assert_eq!(opp.total_score, 8);
        assert_eq!(WebhookNotifier::payload(&opp)["embeds"][0]["color"], COLOR_ORANGE);
    }

    #[tokio::test]
    async fn test_notify_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri())).unwrap();
        notifier.notify_opportunity(&opportunity()).await.unwrap();
    }

    #[tokio::test]
    async fn test_notify_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        let err = notifier.notify_opportunity(&opportunity()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
