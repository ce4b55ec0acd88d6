//! Market scanner for identifying YES/NO equilibrium deviations.

use super::cache::OpportunityCache;
use super::score::{analyze, MarketFilters, OpportunityScore, RejectReason};
use crate::config::ScanConfig;
use crate::events::{EventSink, Notifier, OpportunitySummary, TradingEvent};
use crate::exchange::{MarketDataGateway, MarketSnapshot};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// Parameters of one scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanRequest {
    /// Markets fetched from the venue
    pub limit: usize,
    /// Minimum total score kept (0 disables)
    pub min_score: u8,
    pub filters: MarketFilters,
}

/// Result of analyzing one market.
#[derive(Debug)]
enum AnalysisOutcome {
    Scored(OpportunityScore),
    Rejected(RejectReason),
    Failed(String),
}

/// Scans active markets and ranks equilibrium deviations.
pub struct MarketScanner {
    gateway: Arc<dyn MarketDataGateway>,
    cache: Arc<OpportunityCache>,
    events: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: ScanConfig,
    alert_min_score: u8,
}

impl MarketScanner {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        cache: Arc<OpportunityCache>,
        events: Arc<dyn EventSink>,
        settings: ScanConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            events,
            notifier: None,
            settings,
            alert_min_score: 10,
        }
    }

    /// Push alerts for opportunities scoring at least `min_score`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, min_score: u8) -> Self {
        self.notifier = Some(notifier);
        self.alert_min_score = min_score;
        self
    }

    /// Scan up to `request.limit` active markets and return ranked opportunities.
    ///
    /// Per-market failures are excluded and counted; only a failed market listing is
    /// returned as an error.
    #[instrument(skip(self), fields(limit = request.limit, min_score = request.min_score))]
    pub async fn scan(&self, request: &ScanRequest) -> Result<Vec<OpportunityScore>> {
        let markets = self
            .gateway
            .list_markets(request.limit, true)
            .await
            .context("Failed to list markets")?;
        let market_count = markets.len();

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(market_count);

        for market in markets {
            let sem = semaphore.clone();
            let gateway = self.gateway.clone();
            let cache = self.cache.clone();
            let filters = request.filters;
            let timeout = self.settings.analysis_timeout();

            handles.push(tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return AnalysisOutcome::Failed("scan cancelled".to_string()),
                };

                match tokio::time::timeout(timeout, analyze_market(gateway, cache, market, filters))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => AnalysisOutcome::Failed("timeout".to_string()),
                }
            }));
        }

        // Joined in submission order; ranking below does not depend on completion order
        let outcomes = futures_util::future::join_all(handles).await;

        let mut scored = Vec::new();
        let mut rejected: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut failed = 0usize;

        for outcome in outcomes {
            match outcome {
                Ok(AnalysisOutcome::Scored(score)) => scored.push(score),
                Ok(AnalysisOutcome::Rejected(reason)) => {
                    *rejected.entry(reason.label()).or_default() += 1;
                }
                Ok(AnalysisOutcome::Failed(reason)) => {
                    debug!(reason = %reason, "Market analysis failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Market analysis task panicked");
                    failed += 1;
                }
            }
        }

        let analyzed = scored.len();
        let mut opportunities: Vec<OpportunityScore> = scored
            .into_iter()
            .filter(|s| request.min_score == 0 || s.total_score >= request.min_score)
            .collect();
        rank(&mut opportunities);

        info!(
            markets = market_count,
            analyzed,
            kept = opportunities.len(),
            failed,
            rejected = ?rejected,
            "[SCAN] Scan complete"
        );

        self.events.emit(TradingEvent::ScanComplete {
            count: opportunities.len(),
            top: opportunities
                .iter()
                .take(self.settings.top_n)
                .map(OpportunitySummary::from)
                .collect(),
        });

        self.notify(&opportunities).await;

        Ok(opportunities)
    }

    async fn notify(&self, opportunities: &[OpportunityScore]) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        for opp in opportunities
            .iter()
            .filter(|o| o.total_score >= self.alert_min_score)
        {
            if let Err(e) = notifier.notify_opportunity(opp).await {
                warn!(market_id = %opp.market_id, error = %e, "Failed to send opportunity alert");
            }
        }
    }
}

/// Sort by net profit, then score, descending; market id breaks remaining ties.
pub fn rank(opportunities: &mut [OpportunityScore]) {
    opportunities.sort_by(|a, b| {
        b.estimated_net_profit
            .cmp(&a.estimated_net_profit)
            .then_with(|| b.total_score.cmp(&a.total_score))
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
}

async fn analyze_market(
    gateway: Arc<dyn MarketDataGateway>,
    cache: Arc<OpportunityCache>,
    market: MarketSnapshot,
    filters: MarketFilters,
) -> AnalysisOutcome {
    if let Err(reason) = filters.check(&market) {
        return AnalysisOutcome::Rejected(reason);
    }

    if let Some(hit) = cache.get(&market.id).await {
        return AnalysisOutcome::Scored(hit);
    }

    let Some((token_yes, token_no)) = market.outcome_tokens() else {
        return AnalysisOutcome::Rejected(RejectReason::TooFewTokens);
    };

    let (book_yes, book_no) = match tokio::try_join!(
        gateway.get_order_book(token_yes),
        gateway.get_order_book(token_no)
    ) {
        Ok(books) => books,
        Err(e) => return AnalysisOutcome::Failed(format!("{}: {:#}", market.id, e)),
    };

    match analyze(&market, book_yes.as_ref(), book_no.as_ref(), Utc::now()) {
        Ok(score) => {
            cache.insert(score.clone()).await;
            AnalysisOutcome::Scored(score)
        }
        Err(reason) => AnalysisOutcome::Rejected(reason),
    }
}
