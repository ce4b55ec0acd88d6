//! Entry policy: turns the best ranked opportunity into a two-leg position.

use super::scanner::{MarketScanner, ScanRequest};
use super::score::{MarketFilters, OpportunityScore};
use crate::config::ScannerConfig;
use crate::events::{EventSink, TradingEvent};
use crate::exchange::{MarketDataGateway, OrderRequest, OrderResult, OrderSide};
use crate::persistence::{NewPosition, NewTrade, Position, PositionLedger, Side, TradeType};
use crate::utils::{round_down_to_lot, round_to_precision, round_to_tick};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Price tick of outcome tokens.
const PRICE_TICK: Decimal = dec!(0.001);

/// Share quantity precision.
const SIZE_LOT: Decimal = dec!(0.01);

/// What one entry attempt did.
#[derive(Debug)]
pub enum EntryOutcome {
    Entered(Position),
    AtCapacity,
    NoCapital,
    NoCandidate,
    MarketUnavailable,
    OrdersFailed,
}

/// Split `capital` between the legs by percentage, rounded to cents.
pub fn calculate_amounts(capital: Decimal, ratio_yes: u32, ratio_no: u32) -> (Decimal, Decimal) {
    let leg = |ratio: u32| round_to_precision(capital * Decimal::from(ratio) / dec!(100), 2);
    (leg(ratio_yes), leg(ratio_no))
}

/// Buy order for `amount` of capital at `ask`, or `None` if it rounds to nothing.
fn buy_order(token_id: &str, amount: Decimal, ask: Decimal) -> Option<OrderRequest> {
    if amount <= Decimal::ZERO || ask <= Decimal::ZERO {
        return None;
    }
    let size = round_down_to_lot(amount / ask, SIZE_LOT);
    if size <= Decimal::ZERO {
        return None;
    }
    Some(OrderRequest {
        token_id: token_id.to_string(),
        side: OrderSide::Buy,
        size,
        price: round_to_tick(ask, PRICE_TICK),
    })
}

/// Opens at most one position per call.
pub struct EntryPolicy {
    gateway: Arc<dyn MarketDataGateway>,
    ledger: Arc<dyn PositionLedger>,
    scanner: Arc<MarketScanner>,
    events: Arc<dyn EventSink>,
    stale_after: chrono::Duration,
}

impl EntryPolicy {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        ledger: Arc<dyn PositionLedger>,
        scanner: Arc<MarketScanner>,
        events: Arc<dyn EventSink>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            gateway,
            ledger,
            scanner,
            events,
            stale_after,
        }
    }

    /// Scan, pick the best untraded candidate and open a position on it.
    #[instrument(skip_all)]
    pub async fn run(&self, config: &ScannerConfig) -> Result<EntryOutcome> {
        let active = self.ledger.count_active()?;
        if active >= config.max_active_positions as usize {
            info!(
                active,
                max = config.max_active_positions,
                "At position capacity, skipping entry"
            );
            return Ok(EntryOutcome::AtCapacity);
        }

        let capital = config.capital_per_trade();
        if capital <= Decimal::ZERO {
            warn!("No capital configured per trade, skipping entry");
            return Ok(EntryOutcome::NoCapital);
        }

        let opportunities = self
            .scanner
            .scan(&ScanRequest {
                limit: config.max_markets_per_scan,
                min_score: config.min_score_to_show,
                filters: MarketFilters {
                    min_volume_24h: config.min_volume_24h,
                    min_liquidity: config.min_liquidity,
                },
            })
            .await?;

        self.ledger
            .record_opportunities(&opportunities)
            .context("Failed to persist opportunities")?;
        self.ledger.deactivate_stale_opportunities(self.stale_after)?;

        let Some(candidate) = self.select_candidate(&opportunities, config.min_score_to_trade)? else {
            info!(scanned = opportunities.len(), "No tradeable opportunity");
            return Ok(EntryOutcome::NoCandidate);
        };

        self.enter(candidate, capital, config).await
    }

    /// Best opportunity clearing `min_score` with no ACTIVE position on its market.
    fn select_candidate<'a>(
        &self,
        opportunities: &'a [OpportunityScore],
        min_score: u8,
    ) -> Result<Option<&'a OpportunityScore>> {
        for opp in opportunities.iter().filter(|o| o.total_score >= min_score) {
            if self.ledger.find_active_by_market(&opp.market_id)?.is_none() {
                return Ok(Some(opp));
            }
        }
        Ok(None)
    }

    async fn enter(
        &self,
        opp: &OpportunityScore,
        capital: Decimal,
        config: &ScannerConfig,
    ) -> Result<EntryOutcome> {
        let market = match self.gateway.get_market(&opp.market_id).await? {
            Some(market) => market,
            None => {
                warn!(market_id = %opp.market_id, "Market disappeared before entry");
                return Ok(EntryOutcome::MarketUnavailable);
            }
        };
        let Some((token_yes, token_no)) = market.outcome_tokens() else {
            warn!(market_id = %opp.market_id, "Market has no usable outcome tokens");
            return Ok(EntryOutcome::MarketUnavailable);
        };

        let (amount_yes, amount_no) =
            calculate_amounts(capital, config.default_ratio_yes, config.default_ratio_no);
        let price_yes = round_to_tick(opp.price_yes, PRICE_TICK);
        let price_no = round_to_tick(opp.price_no, PRICE_TICK);

        info!(
            market_id = %opp.market_id,
            score = opp.total_score,
            net_profit = %opp.estimated_net_profit,
            %amount_yes,
            %amount_no,
            "Entering equilibrium position"
        );

        let (fill_yes, fill_no) = tokio::join!(
            self.place(buy_order(token_yes, amount_yes, opp.price_yes)),
            self.place(buy_order(token_no, amount_no, opp.price_no)),
        );

        let (amount_yes, amount_no) = match (&fill_yes, &fill_no) {
            (None, None) => {
                error!(market_id = %opp.market_id, "Both entry orders failed, aborting");
                return Ok(EntryOutcome::OrdersFailed);
            }
            (Some(_), None) => {
                warn!(market_id = %opp.market_id, "NO leg failed, holding YES leg only");
                (amount_yes, Decimal::ZERO)
            }
            (None, Some(_)) => {
                warn!(market_id = %opp.market_id, "YES leg failed, holding NO leg only");
                (Decimal::ZERO, amount_no)
            }
            (Some(_), Some(_)) => (amount_yes, amount_no),
        };

        let position = self.ledger.create_position(&NewPosition {
            market_id: market.id.clone(),
            market_name: market.question.clone(),
            token_yes: token_yes.to_string(),
            token_no: token_no.to_string(),
            entry_price_yes: price_yes,
            entry_price_no: price_no,
            amount_yes,
            amount_no,
        })?;

        for (side, amount, price, fill) in [
            (Side::Yes, amount_yes, price_yes, &fill_yes),
            (Side::No, amount_no, price_no, &fill_no),
        ] {
            if amount > Decimal::ZERO {
                self.ledger.record_trade(
                    &NewTrade::for_position(&position, side, TradeType::Entry, amount, price, amount)
                        .with_order_id(fill.as_ref().map(|f| f.order_id.clone())),
                )?;
            }
        }

        self.ledger.mark_opportunity_traded(&opp.market_id)?;
        self.events.emit(TradingEvent::position_opened(&position));

        info!(
            position_id = position.id,
            market_id = %position.market_id,
            "[ENTRY] Position opened"
        );

        Ok(EntryOutcome::Entered(position))
    }

    async fn place(&self, order: Option<OrderRequest>) -> Option<OrderResult> {
        let order = order?;
        let result = self.gateway.place_order(&order).await;
        if result.is_none() {
            warn!(token_id = %order.token_id, size = %order.size, price = %order.price, "Entry order not confirmed");
        }
        result
    }
}
