//! Runtime trading settings persisted as a singleton row.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How open positions are exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitModel {
    /// Both legs close together on combined P&L.
    #[default]
    Global,
    /// Each leg closes on its own price movement.
    Independent,
}

impl fmt::Display for ExitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitModel::Global => write!(f, "GLOBAL"),
            ExitModel::Independent => write!(f, "INDEPENDENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown exit model '{0}' (expected GLOBAL or INDEPENDENT)")]
pub struct ParseExitModelError(pub String);

impl FromStr for ExitModel {
    type Err = ParseExitModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(ExitModel::Global),
            "INDEPENDENT" => Ok(ExitModel::Independent),
            _ => Err(ParseExitModelError(s.to_string())),
        }
    }
}

/// Trading thresholds, capital limits and exit parameters.
///
/// Read once at the start of every control-loop cycle; updates made while a cycle is
/// running take effect on the next one. Percent fields are expressed in percent
/// (5 = 5%). Exit thresholds apply literally, so a zero stop-loss closes at any loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub auto_trading_enabled: bool,
    pub scan_interval_seconds: u64,
    pub max_markets_per_scan: usize,

    // Scoring thresholds
    pub min_score_to_trade: u8,
    pub min_score_to_show: u8,

    // Market filters (0 disables)
    pub min_volume_24h: Decimal,
    pub min_liquidity: Decimal,

    // Capital limits
    pub max_active_positions: u32,
    pub max_capital_per_trade: Decimal,
    pub max_total_capital: Decimal,

    // Entry ratios in percent of capital
    pub default_ratio_yes: u32,
    pub default_ratio_no: u32,

    // Exit parameters
    pub exit_model: ExitModel,
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Decimal,
    pub leg_stop_loss_percent: Decimal,
    /// Absolute price target for a single leg
    pub leg_take_profit_price: Decimal,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            auto_trading_enabled: false,
            scan_interval_seconds: 30,
            max_markets_per_scan: 100,
            min_score_to_trade: 0,
            min_score_to_show: 0,
            min_volume_24h: Decimal::ZERO,
            min_liquidity: Decimal::ZERO,
            max_active_positions: 0,
            max_capital_per_trade: Decimal::ZERO,
            max_total_capital: Decimal::ZERO,
            default_ratio_yes: 50,
            default_ratio_no: 50,
            exit_model: ExitModel::Global,
            stop_loss_percent: dec!(10),
            take_profit_percent: dec!(20),
            leg_stop_loss_percent: dec!(5),
            leg_take_profit_price: dec!(0.98),
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    /// Capital committed to one entry.
    pub fn capital_per_trade(&self) -> Decimal {
        self.max_capital_per_trade.min(self.max_total_capital)
    }

    /// Validate values before persisting an update.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.scan_interval_seconds >= 1,
            "scan_interval_seconds must be at least 1"
        );

        anyhow::ensure!(
            self.min_score_to_trade <= 10 && self.min_score_to_show <= 10,
            "score thresholds must be between 0 and 10"
        );

        anyhow::ensure!(
            self.default_ratio_yes + self.default_ratio_no <= 100,
            "default_ratio_yes + default_ratio_no must not exceed 100"
        );

        anyhow::ensure!(
            self.max_capital_per_trade >= Decimal::ZERO && self.max_total_capital >= Decimal::ZERO,
            "capital limits must not be negative"
        );

        anyhow::ensure!(
            self.stop_loss_percent >= Decimal::ZERO
                && self.take_profit_percent >= Decimal::ZERO
                && self.leg_stop_loss_percent >= Decimal::ZERO
                && self.leg_stop_loss_percent <= Decimal::ONE_HUNDRED,
            "exit percentages must be non-negative (leg stop-loss at most 100)"
        );

        anyhow::ensure!(
            self.leg_take_profit_price >= Decimal::ZERO && self.leg_take_profit_price <= Decimal::ONE,
            "leg_take_profit_price must be between 0 and 1"
        );

        Ok(())
    }
}
