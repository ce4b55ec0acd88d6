//! Exit evaluation and position closing.

use crate::config::{ExitModel, ScannerConfig};
use crate::events::{EventSink, TradingEvent};
use crate::exchange::{MarketDataGateway, OrderRequest, OrderSide};
use crate::persistence::{NewTrade, Position, PositionLedger, PositionStatus, Side, TradeType};
use crate::utils::{round_down_to_lot, round_to_tick};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Why a position or leg was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    LegCut,
    LegTaken,
    BothLegsExited,
    Panic,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::LegCut => "LEG_CUT",
            CloseReason::LegTaken => "LEG_TAKEN",
            CloseReason::BothLegsExited => "BOTH_LEGS_EXITED",
            CloseReason::Panic => "PANIC",
        };
        f.write_str(s)
    }
}

/// Action recommended for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    Hold,
    /// Close every open leg
    ClosePosition(CloseReason),
    /// Close only the listed legs
    CloseLegs(Vec<(Side, CloseReason)>),
}

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub positions_closed: usize,
    pub legs_closed: usize,
}

/// Decide what to do with a position whose prices and P&L are current.
///
/// Thresholds apply as written: a stop-loss of 0 closes at any loss, a leg take-profit
/// price of 0 takes every open leg.
pub fn decide(position: &Position, config: &ScannerConfig) -> ExitDecision {
    match config.exit_model {
        ExitModel::Global => {
            if position.pnl_percent <= -config.stop_loss_percent {
                ExitDecision::ClosePosition(CloseReason::StopLoss)
            } else if position.pnl_percent >= config.take_profit_percent {
                ExitDecision::ClosePosition(CloseReason::TakeProfit)
            } else {
                ExitDecision::Hold
            }
        }
        ExitModel::Independent => {
            let legs: Vec<(Side, CloseReason)> = position
                .open_legs()
                .into_iter()
                .filter_map(|side| leg_decision(position, side, config).map(|r| (side, r)))
                .collect();

            if legs.is_empty() {
                ExitDecision::Hold
            } else {
                ExitDecision::CloseLegs(legs)
            }
        }
    }
}

fn leg_decision(position: &Position, side: Side, config: &ScannerConfig) -> Option<CloseReason> {
    let price = position.current_price(side);
    let floor =
        position.entry_price(side) * (Decimal::ONE - config.leg_stop_loss_percent / dec!(100));

    if price < floor {
        Some(CloseReason::LegCut)
    } else if price >= config.leg_take_profit_price {
        Some(CloseReason::LegTaken)
    } else {
        None
    }
}

/// Refreshes, evaluates and closes ACTIVE positions.
pub struct ExitStrategyEvaluator {
    gateway: Arc<dyn MarketDataGateway>,
    ledger: Arc<dyn PositionLedger>,
    events: Arc<dyn EventSink>,
}

impl ExitStrategyEvaluator {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        ledger: Arc<dyn PositionLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            events,
        }
    }

    /// Evaluate every ACTIVE position once.
    ///
    /// Failing to list positions is an error; failures on a single position are logged
    /// and that position is skipped.
    pub async fn evaluate_all(&self, config: &ScannerConfig) -> Result<ExitSummary> {
        self.evaluate(config, &[]).await
    }

    /// Like [`evaluate_all`](Self::evaluate_all), leaving the positions in `skip_ids`
    /// untouched.
    #[instrument(skip_all, fields(exit_model = %config.exit_model))]
    pub async fn evaluate(&self, config: &ScannerConfig, skip_ids: &[i64]) -> Result<ExitSummary> {
        let positions = self.ledger.list_active()?;
        let mut summary = ExitSummary::default();

        for mut position in positions.into_iter().filter(|p| !skip_ids.contains(&p.id)) {
            if !self.refresh_prices(&mut position).await {
                summary.skipped += 1;
                continue;
            }
            summary.evaluated += 1;

            match self.ledger.update_position(&position) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(position_id = position.id, "Position closed elsewhere, skipping");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(position_id = position.id, error = %e, "Failed to persist refreshed prices");
                    summary.skipped += 1;
                    continue;
                }
            }

            let result = match decide(&position, config) {
                ExitDecision::Hold => Ok(()),
                ExitDecision::ClosePosition(reason) => self
                    .close_position(position.clone(), reason)
                    .await
                    .map(|_| summary.positions_closed += 1),
                ExitDecision::CloseLegs(legs) => {
                    self.close_legs(&mut position, &legs, &mut summary).await
                }
            };

            if let Err(e) = result {
                error!(position_id = position.id, error = %e, "Failed to apply exit decision");
            }
        }

        if summary.positions_closed > 0 || summary.legs_closed > 0 {
            info!(
                evaluated = summary.evaluated,
                skipped = summary.skipped,
                positions_closed = summary.positions_closed,
                legs_closed = summary.legs_closed,
                "[EXIT] Exit evaluation complete"
            );
        }

        Ok(summary)
    }

    async fn close_legs(
        &self,
        position: &mut Position,
        legs: &[(Side, CloseReason)],
        summary: &mut ExitSummary,
    ) -> Result<()> {
        for (side, reason) in legs {
            self.close_leg(position, *side, *reason).await?;
            summary.legs_closed += 1;
        }
        if !position.is_active() {
            summary.positions_closed += 1;
        }
        Ok(())
    }

    /// Fetch midpoints for every open leg and revalue the position.
    ///
    /// Returns `false` (leaving the position untouched) if any open leg has no price.
    pub async fn refresh_prices(&self, position: &mut Position) -> bool {
        let mut prices = Vec::with_capacity(2);

        for side in position.open_legs() {
            match self.gateway.get_midpoint(position.token(side)).await {
                Ok(Some(price)) => prices.push((side, price)),
                Ok(None) => {
                    warn!(position_id = position.id, %side, "No midpoint, skipping position this cycle");
                    return false;
                }
                Err(e) => {
                    warn!(position_id = position.id, %side, error = %e, "Price refresh failed, skipping position this cycle");
                    return false;
                }
            }
        }

        for (side, price) in prices {
            position.set_leg_price(side, price);
        }
        position.recompute_pnl();

        debug!(
            position_id = position.id,
            pnl = %position.pnl,
            pnl_percent = %position.pnl_percent,
            "Position revalued"
        );
        true
    }

    /// Exit every open leg and move the position to a terminal status.
    ///
    /// Panic closes end as LIQUIDATED, every other reason as CLOSED. Each leg is
    /// persisted as closed right after its EXIT trade, so a failure part way leaves only
    /// the remaining legs open.
    pub async fn close_position(&self, mut position: Position, reason: CloseReason) -> Result<Position> {
        self.ensure_active(position.id)?;

        for side in position.open_legs() {
            if position.amount(side) > Decimal::ZERO {
                self.exit_leg(&position, side).await?;
            }
            // Keeps the P&L of the close for reporting
            position.mark_leg_closed(side);
            self.persist(&position)?;
        }

        position.status = if reason == CloseReason::Panic {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Closed
        };
        position.closed_at = Some(Utc::now());
        self.persist(&position)?;

        info!(
            position_id = position.id,
            market_id = %position.market_id,
            %reason,
            pnl = %position.pnl,
            pnl_percent = %position.pnl_percent,
            "[EXIT] Position closed"
        );
        self.events.emit(TradingEvent::position_closed(&position, reason));

        Ok(position)
    }

    /// Exit one leg. The position becomes CLOSED once both legs are closed.
    pub async fn close_leg(&self, position: &mut Position, side: Side, reason: CloseReason) -> Result<()> {
        if position.is_leg_closed(side) {
            return Ok(());
        }
        self.ensure_active(position.id)?;

        let price = position.current_price(side);
        let value = position.current_value(side);
        if position.amount(side) > Decimal::ZERO {
            self.exit_leg(position, side).await?;
        }

        position.mark_leg_closed(side);

        // The last leg's P&L is the realized result of the position
        let both_closed = position.is_yes_closed && position.is_no_closed;
        if both_closed {
            position.status = PositionStatus::Closed;
            position.closed_at = Some(Utc::now());
        } else {
            position.recompute_pnl();
        }
        self.persist(position)?;

        info!(
            position_id = position.id,
            %side,
            %reason,
            %price,
            %value,
            active_side = %position.active_side,
            "[EXIT] Leg closed"
        );
        self.events.emit(TradingEvent::LegClosed {
            position_id: position.id,
            market_id: position.market_id.clone(),
            side,
            reason,
            price,
            value,
        });

        if both_closed {
            self.events
                .emit(TradingEvent::position_closed(position, CloseReason::BothLegsExited));
        }

        Ok(())
    }

    /// Close every ACTIVE position unconditionally. Returns how many were closed.
    ///
    /// Prices are refreshed where possible; a leg without a fresh price exits at its
    /// last known value.
    pub async fn close_all(&self, reason: CloseReason) -> Result<usize> {
        let positions = self.ledger.list_active()?;
        let mut closed = 0;

        for mut position in positions {
            if !self.refresh_prices(&mut position).await {
                debug!(position_id = position.id, "Closing at last known prices");
            }
            match self.close_position(position, reason).await {
                Ok(_) => closed += 1,
                Err(e) => error!(error = %e, "Failed to close position"),
            }
        }

        Ok(closed)
    }

    fn ensure_active(&self, position_id: i64) -> Result<()> {
        match self.ledger.get_position(position_id)? {
            Some(stored) if stored.is_active() => Ok(()),
            _ => anyhow::bail!("position {} is no longer active", position_id),
        }
    }

    fn persist(&self, position: &Position) -> Result<()> {
        anyhow::ensure!(
            self.ledger.update_position(position)?,
            "position {} is no longer active",
            position.id
        );
        Ok(())
    }

    /// Record the EXIT trade for one leg and place a best-effort SELL.
    async fn exit_leg(&self, position: &Position, side: Side) -> Result<()> {
        let amount = position.amount(side);
        let price = position.current_price(side);
        let entry = position.entry_price(side);

        let order_id = if entry > Decimal::ZERO && price > Decimal::ZERO {
            let order = OrderRequest {
                token_id: position.token(side).to_string(),
                side: OrderSide::Sell,
                size: round_down_to_lot(amount / entry, dec!(0.01)),
                price: round_to_tick(price, dec!(0.001)),
            };
            match self.gateway.place_order(&order).await {
                Some(result) => Some(result.order_id),
                None => {
                    warn!(position_id = position.id, %side, "Exit order not confirmed, recording exit anyway");
                    None
                }
            }
        } else {
            None
        };

        self.ledger.record_trade(
            &NewTrade::for_position(
                position,
                side,
                TradeType::Exit,
                amount,
                price,
                position.current_value(side),
            )
            .with_order_id(order_id),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::exchange::MockGateway;
    use crate::persistence::{ActiveSide, NewPosition, SqliteLedger, StoredOpportunity, Trade};
    use crate::strategy::OpportunityScore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// SQLite ledger whose n-th `record_trade` call fails.
    struct FailingTradeLedger {
        inner: SqliteLedger,
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl PositionLedger for FailingTradeLedger {
        fn load_scanner_config(&self) -> Result<ScannerConfig> {
            self.inner.load_scanner_config()
        }
        fn save_scanner_config(&self, config: &ScannerConfig) -> Result<()> {
            self.inner.save_scanner_config(config)
        }
        fn create_position(&self, new: &NewPosition) -> Result<Position> {
            self.inner.create_position(new)
        }
        fn update_position(&self, position: &Position) -> Result<bool> {
            self.inner.update_position(position)
        }
        fn get_position(&self, id: i64) -> Result<Option<Position>> {
            self.inner.get_position(id)
        }
        fn find_active_by_market(&self, market_id: &str) -> Result<Option<Position>> {
            self.inner.find_active_by_market(market_id)
        }
        fn list_active(&self) -> Result<Vec<Position>> {
            self.inner.list_active()
        }
        fn record_trade(&self, trade: &NewTrade) -> Result<Trade> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                anyhow::bail!("disk full");
            }
            self.inner.record_trade(trade)
        }
        fn trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>> {
            self.inner.trades_for_position(position_id)
        }
        fn record_opportunities(&self, opportunities: &[OpportunityScore]) -> Result<()> {
            self.inner.record_opportunities(opportunities)
        }
        fn mark_opportunity_traded(&self, market_id: &str) -> Result<()> {
            self.inner.mark_opportunity_traded(market_id)
        }
        fn top_opportunities(&self, limit: usize, min_score: u8) -> Result<Vec<StoredOpportunity>> {
            self.inner.top_opportunities(limit, min_score)
        }
        fn deactivate_stale_opportunities(&self, max_age: chrono::Duration) -> Result<usize> {
            self.inner.deactivate_stale_opportunities(max_age)
        }
    }

    struct Harness {
        gateway: Arc<MockGateway>,
        ledger: Arc<SqliteLedger>,
        events: Arc<RecordingSink>,
        evaluator: ExitStrategyEvaluator,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let events = Arc::new(RecordingSink::default());
        let evaluator = ExitStrategyEvaluator::new(gateway.clone(), ledger.clone(), events.clone());
        Harness {
            gateway,
            ledger,
            events,
            evaluator,
        }
    }

    fn open_position(ledger: &SqliteLedger, market_id: &str) -> Position {
        ledger
            .create_position(&NewPosition {
                market_id: market_id.to_string(),
                market_name: format!("Market {}", market_id),
                token_yes: format!("{}-yes", market_id),
                token_no: format!("{}-no", market_id),
                entry_price_yes: dec!(0.40),
                entry_price_no: dec!(0.55),
                amount_yes: dec!(60),
                amount_no: dec!(40),
            })
            .unwrap()
    }

    fn global(stop_loss: Decimal, take_profit: Decimal) -> ScannerConfig {
        ScannerConfig {
            exit_model: ExitModel::Global,
            stop_loss_percent: stop_loss,
            take_profit_percent: take_profit,
            ..Default::default()
        }
    }

    fn independent(leg_stop_loss: Decimal, leg_take_profit: Decimal) -> ScannerConfig {
        ScannerConfig {
            exit_model: ExitModel::Independent,
            leg_stop_loss_percent: leg_stop_loss,
            leg_take_profit_price: leg_take_profit,
            ..Default::default()
        }
    }

    fn with_pnl_percent(pnl_percent: Decimal) -> Position {
        let h = harness();
        let mut position = open_position(&h.ledger, "m1");
        position.pnl_percent = pnl_percent;
        position
    }

    #[test]
    fn test_global_stop_loss_boundary_is_inclusive() {
        let config = global(dec!(10), dec!(20));
        assert_eq!(
            decide(&with_pnl_percent(dec!(-10)), &config),
            ExitDecision::ClosePosition(CloseReason::StopLoss)
        );
        assert_eq!(decide(&with_pnl_percent(dec!(-9.99)), &config), ExitDecision::Hold);
        assert_eq!(
            decide(&with_pnl_percent(dec!(20)), &config),
            ExitDecision::ClosePosition(CloseReason::TakeProfit)
        );
    }

    #[test]
    fn test_zero_thresholds_apply_as_written() {
        let config = global(Decimal::ZERO, dec!(20));
        assert_eq!(
            decide(&with_pnl_percent(dec!(-5)), &config),
            ExitDecision::ClosePosition(CloseReason::StopLoss)
        );
        assert_eq!(decide(&with_pnl_percent(dec!(0.01)), &config), ExitDecision::Hold);

        // Every open leg is at or above a 0 price target
        let config = independent(dec!(5), Decimal::ZERO);
        let mut position = with_pnl_percent(Decimal::ZERO);
        position.current_price_yes = dec!(0.45);
        assert_eq!(
            decide(&position, &config),
            ExitDecision::CloseLegs(vec![
                (Side::Yes, CloseReason::LegTaken),
                (Side::No, CloseReason::LegTaken)
            ])
        );
    }

    #[test]
    fn test_leg_stop_loss_threshold() {
        // entry 0.40 with 5% -> floor 0.38
        let config = independent(dec!(5), dec!(0.98));
        let mut position = with_pnl_percent(Decimal::ZERO);

        position.current_price_yes = dec!(0.38);
        assert_eq!(decide(&position, &config), ExitDecision::Hold);

        position.current_price_yes = dec!(0.379);
        assert_eq!(
            decide(&position, &config),
            ExitDecision::CloseLegs(vec![(Side::Yes, CloseReason::LegCut)])
        );
    }

    #[test]
    fn test_leg_take_profit_is_absolute_price() {
        let config = independent(Decimal::ZERO, dec!(0.60));
        let mut position = with_pnl_percent(Decimal::ZERO);
        position.current_price_no = dec!(0.60);

        assert_eq!(
            decide(&position, &config),
            ExitDecision::CloseLegs(vec![(Side::No, CloseReason::LegTaken)])
        );

        position.mark_leg_closed(Side::No);
        assert_eq!(decide(&position, &config), ExitDecision::Hold);
    }

    #[tokio::test]
    async fn test_global_stop_loss_closes_both_legs() {
        let h = harness();
        let position = open_position(&h.ledger, "m1");
        h.gateway.set_midpoint("m1-yes", dec!(0.30)).await; // 60 -> 45
        h.gateway.set_midpoint("m1-no", dec!(0.55)).await; // 40 -> 40

        let summary = h.evaluator.evaluate_all(&global(dec!(10), Decimal::ZERO)).await.unwrap();
        assert_eq!(summary.positions_closed, 1);

        let stored = h.ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
        assert_eq!(stored.amount_yes, Decimal::ZERO);
        assert_eq!(stored.amount_no, Decimal::ZERO);
        assert_eq!(stored.pnl, dec!(-15));
        assert!(stored.closed_at.is_some());

        let trades = h.ledger.trades_for_position(position.id).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].total_value, dec!(45));
        assert!(trades.iter().all(|t| t.trade_type == TradeType::Exit));

        let sells = h.gateway.placed_orders().await;
        assert_eq!(sells.len(), 2);
        assert!(sells.iter().all(|o| o.side == OrderSide::Sell));
        assert_eq!(sells[0].size, dec!(150)); // 60 / 0.40 shares

        assert_eq!(h.events.count("POSITION_CLOSED"), 1);
    }

    #[tokio::test]
    async fn test_independent_single_leg_keeps_position_active() {
        let h = harness();
        let position = open_position(&h.ledger, "m1");
        h.gateway.set_midpoint("m1-yes", dec!(0.35)).await;
        h.gateway.set_midpoint("m1-no", dec!(0.60)).await;

        let config = independent(dec!(5), dec!(0.98));
        h.evaluator.evaluate_all(&config).await.unwrap();

        let stored = h.ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Active);
        assert!(stored.is_yes_closed);
        assert!(!stored.is_no_closed);
        assert_eq!(stored.active_side, ActiveSide::No);
        assert_eq!(stored.amount_yes, Decimal::ZERO);
        assert_eq!(h.events.count("LEG_CLOSED"), 1);
        assert_eq!(h.events.count("POSITION_CLOSED"), 0);

        // Only the open leg is priced from now on
        h.gateway.fail_midpoint_for("m1-yes").await;
        h.gateway.set_midpoint("m1-no", dec!(0.50)).await; // below 0.5225
        let summary = h.evaluator.evaluate_all(&config).await.unwrap();
        assert_eq!(summary.skipped, 0);

        let stored = h.ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
        assert!(stored.is_yes_closed && stored.is_no_closed);
        assert!(stored.closed_at.is_some());
        assert_eq!(h.events.count("POSITION_CLOSED"), 1);

        // Realized P&L of the last leg survives the close: 40 * 0.50 / 0.55 - 40
        assert!(stored.pnl < Decimal::ZERO);
        assert!(stored.pnl > dec!(-3.64));
        let reported = h.events.events().into_iter().find_map(|e| match e {
            TradingEvent::PositionClosed { pnl, .. } => Some(pnl),
            _ => None,
        });
        assert_eq!(reported, Some(stored.pnl));

        let trades = h.ledger.trades_for_position(position.id).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Yes);
        assert_eq!(trades[1].side, Side::No);
    }

    #[tokio::test]
    async fn test_failed_refresh_skips_position() {
        let h = harness();
        let position = open_position(&h.ledger, "m1");
        h.gateway.set_midpoint("m1-yes", dec!(0.10)).await;
        h.gateway.fail_midpoint_for("m1-no").await;

        let summary = h.evaluator.evaluate_all(&global(dec!(10), Decimal::ZERO)).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.evaluated, 0);

        let stored = h.ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Active);
        assert_eq!(stored.current_price_yes, dec!(0.40));
    }

    #[tokio::test]
    async fn test_close_all_liquidates_every_position() {
        let h = harness();
        for id in ["m1", "m2", "m3"] {
            open_position(&h.ledger, id);
        }
        // No midpoints configured: closes at last known prices

        let closed = h.evaluator.close_all(CloseReason::Panic).await.unwrap();
        assert_eq!(closed, 3);
        assert_eq!(h.ledger.count_active().unwrap(), 0);
        assert_eq!(h.events.count("POSITION_CLOSED"), 3);

        let stored = h.ledger.get_position(1).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Liquidated);
    }

    #[tokio::test]
    async fn test_zero_amount_leg_records_no_trade() {
        let h = harness();
        let mut position = h
            .ledger
            .create_position(&NewPosition {
                market_id: "m1".to_string(),
                market_name: "Market".to_string(),
                token_yes: "m1-yes".to_string(),
                token_no: "m1-no".to_string(),
                entry_price_yes: dec!(0.40),
                entry_price_no: dec!(0.55),
                amount_yes: dec!(60),
                amount_no: Decimal::ZERO,
            })
            .unwrap();

        h.evaluator
            .close_leg(&mut position, Side::No, CloseReason::LegCut)
            .await
            .unwrap();

        assert!(h.ledger.trades_for_position(position.id).unwrap().is_empty());
        assert!(h.gateway.placed_orders().await.is_empty());
        assert_eq!(position.active_side, ActiveSide::Yes);
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_close_a_liquidated_position() {
        let h = harness();
        open_position(&h.ledger, "m1");
        let stale = h.ledger.list_active().unwrap().remove(0);

        assert_eq!(h.evaluator.close_all(CloseReason::Panic).await.unwrap(), 1);
        let orders_after_panic = h.gateway.placed_orders().await.len();

        assert!(h
            .evaluator
            .close_position(stale.clone(), CloseReason::StopLoss)
            .await
            .is_err());

        let stored = h.ledger.get_position(stale.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Liquidated);
        assert_eq!(stored.amount_yes, Decimal::ZERO);
        assert_eq!(h.ledger.trades_for_position(stale.id).unwrap().len(), 2);
        assert_eq!(h.gateway.placed_orders().await.len(), orders_after_panic);
    }

    #[tokio::test]
    async fn test_failed_close_keeps_exited_leg_closed() {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(FailingTradeLedger {
            inner: SqliteLedger::in_memory().unwrap(),
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });
        let events = Arc::new(RecordingSink::default());
        let evaluator = ExitStrategyEvaluator::new(gateway.clone(), ledger.clone(), events.clone());
        let position = open_position(&ledger.inner, "m1");

        // YES exits, the NO trade write fails
        assert!(evaluator
            .close_position(position.clone(), CloseReason::StopLoss)
            .await
            .is_err());

        let stored = ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Active);
        assert!(stored.is_yes_closed);
        assert_eq!(stored.amount_yes, Decimal::ZERO);
        assert!(!stored.is_no_closed);
        assert_eq!(stored.amount_no, dec!(40));
        assert_eq!(events.count("POSITION_CLOSED"), 0);

        // Retrying only exits the remaining leg
        evaluator
            .close_position(stored, CloseReason::StopLoss)
            .await
            .unwrap();

        let trades = ledger.trades_for_position(position.id).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Yes);
        assert_eq!(trades[1].side, Side::No);
        assert_eq!(ledger.get_position(position.id).unwrap().unwrap().status, PositionStatus::Closed);
        assert_eq!(
            gateway.placed_orders().await.iter().filter(|o| o.token_id == "m1-yes").count(),
            1
        );
    }
}
