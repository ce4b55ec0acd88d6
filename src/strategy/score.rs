//! Opportunity scoring for YES/NO equilibrium deviations.
//!
//! Everything here is pure: given a market snapshot and both legs' order books the
//! result depends only on its inputs and `now`.

use crate::exchange::{MarketSnapshot, OrderBook};
use crate::utils::weighted_average;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed taker-fee approximation charged against a two-leg entry.
pub const FEE_APPROXIMATION: Decimal = dec!(0.02);

/// Ask sum above which the pair is a certain loss.
pub const CERTAIN_LOSS_COST: Decimal = dec!(1.02);

/// Net profit above which the score is forced to the top band.
pub const PROFIT_OVERRIDE: Decimal = dec!(0.005);

/// Book levels counted per side for liquidity.
const DEPTH_LEVELS: usize = 5;

/// Why a market produced no score. Distinct from a legitimately low score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RejectReason {
    #[error("fewer than two usable outcome tokens")]
    TooFewTokens,
    #[error("no ask on one of the legs")]
    MissingAsk,
    #[error("zero ask price")]
    ZeroAsk,
    #[error("24h volume below minimum")]
    LowVolume,
    #[error("liquidity below minimum")]
    LowLiquidity,
}

impl RejectReason {
    /// Short label used in scan summaries.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::TooFewTokens => "too_few_tokens",
            RejectReason::MissingAsk => "missing_ask",
            RejectReason::ZeroAsk => "zero_ask",
            RejectReason::LowVolume => "low_volume",
            RejectReason::LowLiquidity => "low_liquidity",
        }
    }
}

/// Pre-fetch market filters. A zero minimum disables that filter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketFilters {
    pub min_volume_24h: Decimal,
    pub min_liquidity: Decimal,
}

impl MarketFilters {
    /// Reject markets below the volume or liquidity floor.
    pub fn check(&self, market: &MarketSnapshot) -> Result<(), RejectReason> {
        if self.min_volume_24h > Decimal::ZERO && market.volume_24h < self.min_volume_24h {
            return Err(RejectReason::LowVolume);
        }
        if self.min_liquidity > Decimal::ZERO && market.liquidity < self.min_liquidity {
            return Err(RejectReason::LowLiquidity);
        }
        Ok(())
    }
}

/// Scored equilibrium deviation for one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScore {
    pub market_id: String,
    pub market_name: String,
    pub slug: Option<String>,
    pub token_yes: String,
    pub token_no: String,

    /// Best ask per leg
    pub price_yes: Decimal,
    pub price_no: Decimal,

    pub divergence_score: Decimal,
    pub volume_score: Decimal,
    pub liquidity_score: Decimal,
    pub timing_score: Decimal,
    pub activity_score: Decimal,
    /// Integer score in 1..=10
    pub total_score: u8,

    /// |1 - (ask_yes + ask_no)| in percent
    pub spread_percent: Decimal,
    pub estimated_net_profit: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub hours_to_resolution: Option<Decimal>,
    pub analyzed_at: DateTime<Utc>,
}

impl OpportunityScore {
    /// Cost of buying one share of each leg.
    pub fn total_cost(&self) -> Decimal {
        self.price_yes + self.price_no
    }

    /// Absolute deviation of the ask sum from 1.
    pub fn divergence(&self) -> Decimal {
        (Decimal::ONE - self.total_cost()).abs()
    }
}

/// `min(10, |1 - (ask_yes + ask_no)| * 200)`
pub fn divergence_score(ask_yes: Decimal, ask_no: Decimal) -> Decimal {
    ((Decimal::ONE - (ask_yes + ask_no)).abs() * dec!(200)).min(dec!(10))
}

fn volume_step(volume: Decimal) -> Decimal {
    if volume >= dec!(100000) {
        dec!(10)
    } else if volume >= dec!(50000) {
        dec!(8)
    } else if volume >= dec!(10000) {
        dec!(5)
    } else {
        dec!(3)
    }
}

/// Step score of the larger of 24h and lifetime volume.
pub fn volume_score(market: &MarketSnapshot) -> Decimal {
    volume_step(market.activity_volume())
}

/// Trading activity. Shares the volume breakpoints.
pub fn activity_score(market: &MarketSnapshot) -> Decimal {
    volume_step(market.activity_volume())
}

/// Step score of summed top-5 bid and ask depth. Neutral 5 without book data.
pub fn liquidity_score(books: &[&OrderBook]) -> Decimal {
    let has_levels = books
        .iter()
        .any(|b| !b.bids.is_empty() || !b.asks.is_empty());
    if !has_levels {
        return dec!(5);
    }

    let depth: Decimal = books.iter().map(|b| b.depth(DEPTH_LEVELS)).sum();
    if depth >= dec!(10000) {
        dec!(10)
    } else if depth >= dec!(5000) {
        dec!(8)
    } else if depth >= dec!(2000) {
        dec!(6)
    } else if depth >= dec!(1000) {
        dec!(5)
    } else {
        dec!(3)
    }
}

/// Hours until `end_date`, negative when already past.
pub fn hours_to_resolution(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Decimal> {
    end_date.map(|end| Decimal::from((end - now).num_minutes()) / dec!(60))
}

/// Preference for a 1-7 day resolution horizon.
pub fn timing_score(hours: Option<Decimal>) -> Decimal {
    let Some(hours) = hours else {
        return dec!(5);
    };

    if hours >= dec!(24) && hours <= dec!(168) {
        dec!(10)
    } else if hours >= dec!(12) && hours < dec!(24) {
        dec!(7)
    } else if hours > dec!(168) && hours <= dec!(336) {
        dec!(6)
    } else if hours < dec!(12) {
        dec!(3)
    } else {
        dec!(4)
    }
}

/// `1 - (ask_yes + ask_no) - fee`
pub fn estimated_net_profit(ask_yes: Decimal, ask_no: Decimal) -> Decimal {
    Decimal::ONE - (ask_yes + ask_no) - FEE_APPROXIMATION
}

/// Weighted component total, floored and clamped to 1..=10, then the profitability
/// override.
pub fn total_score(
    divergence: Decimal,
    volume: Decimal,
    liquidity: Decimal,
    timing: Decimal,
    activity: Decimal,
    ask_sum: Decimal,
    net_profit: Decimal,
) -> u8 {
    if ask_sum > CERTAIN_LOSS_COST {
        return 1;
    }
    if net_profit > PROFIT_OVERRIDE {
        return if liquidity < dec!(5) { 8 } else { 10 };
    }

    let weighted = weighted_average(&[
        (divergence, dec!(0.40)),
        (volume, dec!(0.20)),
        (liquidity, dec!(0.20)),
        (timing, dec!(0.10)),
        (activity, dec!(0.10)),
    ]);

    weighted.floor().to_u8().unwrap_or(1).clamp(1, 10)
}

/// Score one market from both legs' order books.
pub fn analyze(
    market: &MarketSnapshot,
    book_yes: Option<&OrderBook>,
    book_no: Option<&OrderBook>,
    now: DateTime<Utc>,
) -> Result<OpportunityScore, RejectReason> {
    let (token_yes, token_no) = market.outcome_tokens().ok_or(RejectReason::TooFewTokens)?;

    let (book_yes, book_no) = match (book_yes, book_no) {
        (Some(y), Some(n)) => (y, n),
        _ => return Err(RejectReason::MissingAsk),
    };
    let ask_yes = book_yes.best_ask().ok_or(RejectReason::MissingAsk)?;
    let ask_no = book_no.best_ask().ok_or(RejectReason::MissingAsk)?;
    if ask_yes <= Decimal::ZERO || ask_no <= Decimal::ZERO {
        return Err(RejectReason::ZeroAsk);
    }

    let ask_sum = ask_yes + ask_no;
    let hours = hours_to_resolution(market.end_date, now);

    let divergence = divergence_score(ask_yes, ask_no);
    let volume = volume_score(market);
    let liquidity = liquidity_score(&[book_yes, book_no]);
    let timing = timing_score(hours);
    let activity = activity_score(market);
    let net_profit = estimated_net_profit(ask_yes, ask_no);

    Ok(OpportunityScore {
        market_id: market.id.clone(),
        market_name: market.question.clone(),
        slug: market.slug.clone(),
        token_yes: token_yes.to_string(),
        token_no: token_no.to_string(),
        price_yes: ask_yes,
        price_no: ask_no,
        divergence_score: divergence,
        volume_score: volume,
        liquidity_score: liquidity,
        timing_score: timing,
        activity_score: activity,
        total_score: total_score(divergence, volume, liquidity, timing, activity, ask_sum, net_profit),
        spread_percent: (Decimal::ONE - ask_sum).abs() * dec!(100),
        estimated_net_profit: net_profit,
        volume_24h: market.volume_24h,
        liquidity: market.liquidity,
        hours_to_resolution: hours,
        analyzed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PriceLevel;
    use chrono::Duration;

    fn book(ask: Decimal, size: Decimal) -> OrderBook {
        OrderBook::new(
            vec![PriceLevel::new(ask - dec!(0.01), size)],
            vec![PriceLevel::new(ask, size)],
        )
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot::new("m1", "Will it rain?", vec!["yes".into(), "no".into()])
            .with_volume(dec!(20000), dec!(60000))
            .with_liquidity(dec!(3000))
    }

    #[test]
    fn test_divergence_is_zero_at_equilibrium() {
        for (yes, no) in [(dec!(0.5), dec!(0.5)), (dec!(0.13), dec!(0.87)), (dec!(0.999), dec!(0.001))] {
            assert_eq!(divergence_score(yes, no), Decimal::ZERO);
        }
    }

    #[test]
    fn test_divergence_is_symmetric_and_capped() {
        assert_eq!(divergence_score(dec!(0.48), dec!(0.49)), dec!(6));
        assert_eq!(divergence_score(dec!(0.52), dec!(0.51)), dec!(6));
        assert_eq!(divergence_score(dec!(0.30), dec!(0.30)), dec!(10));
    }

    #[test]
    fn test_volume_breakpoints_use_larger_volume() {
        let m = MarketSnapshot::new("m", "q", vec![]).with_volume(dec!(500), dec!(100000));
        assert_eq!(volume_score(&m), dec!(10));
        let m = MarketSnapshot::new("m", "q", vec![]).with_volume(dec!(50000), dec!(0));
        assert_eq!(volume_score(&m), dec!(8));
        let m = MarketSnapshot::new("m", "q", vec![]).with_volume(dec!(9999), dec!(0));
        assert_eq!(activity_score(&m), dec!(3));
    }

    #[test]
    fn test_liquidity_is_neutral_without_books() {
        assert_eq!(liquidity_score(&[]), dec!(5));
        let empty = OrderBook::default();
        assert_eq!(liquidity_score(&[&empty, &empty]), dec!(5));
    }

    #[test]
    fn test_liquidity_breakpoints() {
        let deep = book(dec!(0.5), dec!(2500)); // 5000 per book
        assert_eq!(liquidity_score(&[&deep, &deep]), dec!(10));
        let thin = book(dec!(0.5), dec!(100));
        assert_eq!(liquidity_score(&[&thin, &thin]), dec!(3));
        let mid = book(dec!(0.5), dec!(300)); // 1200 total
        assert_eq!(liquidity_score(&[&mid, &mid]), dec!(5));
    }

    #[test]
    fn test_timing_bands() {
        assert_eq!(timing_score(None), dec!(5));
        assert_eq!(timing_score(Some(dec!(48))), dec!(10));
        assert_eq!(timing_score(Some(dec!(168))), dec!(10));
        assert_eq!(timing_score(Some(dec!(18))), dec!(7));
        assert_eq!(timing_score(Some(dec!(200))), dec!(6));
        assert_eq!(timing_score(Some(dec!(2))), dec!(3));
        assert_eq!(timing_score(Some(dec!(-5))), dec!(3));
        assert_eq!(timing_score(Some(dec!(1000))), dec!(4));
    }

    #[test]
    fn test_total_is_floored_and_never_zero() {
        // 0.4*0 + 0.2*3 + 0.2*3 + 0.1*3 + 0.1*3 = 1.8 -> 1
        assert_eq!(
            total_score(dec!(0), dec!(3), dec!(3), dec!(3), dec!(3), dec!(1), dec!(-0.02)),
            1
        );
        // 0.4*6 + 0.2*8 + 0.2*6 + 0.1*10 + 0.1*8 = 7.0
        assert_eq!(
            total_score(dec!(6), dec!(8), dec!(6), dec!(10), dec!(8), dec!(1.03), dec!(-0.05)),
            1
        );
        assert_eq!(
            total_score(dec!(6), dec!(8), dec!(6), dec!(10), dec!(8), dec!(0.97), dec!(0.01)),
            10
        );
        assert_eq!(
            total_score(dec!(6), dec!(8), dec!(6), dec!(10), dec!(8), dec!(1.01), dec!(-0.03)),
            7
        );
    }

    #[test]
    fn test_profit_override_respects_poor_liquidity() {
        assert_eq!(
            total_score(dec!(10), dec!(3), dec!(3), dec!(5), dec!(3), dec!(0.90), dec!(0.08)),
            8
        );
    }

    #[test]
    fn test_analyze_scores_underpriced_pair() {
        let now = Utc::now();
        let m = market().with_end_date(now + Duration::hours(48));
        let yes = book(dec!(0.45), dec!(600));
        let no = book(dec!(0.50), dec!(600));

        let score = analyze(&m, Some(&yes), Some(&no), now).unwrap();

        assert_eq!(score.price_yes, dec!(0.45));
        assert_eq!(score.price_no, dec!(0.50));
        assert_eq!(score.divergence_score, dec!(10));
        assert_eq!(score.spread_percent, dec!(5));
        assert_eq!(score.estimated_net_profit, dec!(0.03));
        assert_eq!(score.timing_score, dec!(10));
        assert_eq!(score.liquidity_score, dec!(6)); // 2400 total
        assert_eq!(score.total_score, 10);
        assert_eq!(score.divergence(), dec!(0.05));
    }

    #[test]
    fn test_analyze_certain_loss_scores_one() {
        let now = Utc::now();
        let yes = book(dec!(0.55), dec!(5000));
        let no = book(dec!(0.50), dec!(5000));

        let score = analyze(&market(), Some(&yes), Some(&no), now).unwrap();
        assert_eq!(score.total_score, 1);
    }

    #[test]
    fn test_analyze_rejects_bad_data() {
        let now = Utc::now();
        let yes = book(dec!(0.45), dec!(100));
        let no = book(dec!(0.50), dec!(100));

        let single = MarketSnapshot::new("m", "q", vec!["yes".into()]);
        assert_eq!(
            analyze(&single, Some(&yes), Some(&no), now),
            Err(RejectReason::TooFewTokens)
        );

        assert_eq!(analyze(&market(), Some(&yes), None, now), Err(RejectReason::MissingAsk));

        let no_asks = OrderBook::new(vec![PriceLevel::new(dec!(0.4), dec!(10))], vec![]);
        assert_eq!(
            analyze(&market(), Some(&yes), Some(&no_asks), now),
            Err(RejectReason::MissingAsk)
        );

        let zero = book(Decimal::ZERO, dec!(10));
        assert_eq!(analyze(&market(), Some(&zero), Some(&no), now), Err(RejectReason::ZeroAsk));
    }

    #[test]
    fn test_filters_zero_disables() {
        let m = market();
        assert!(MarketFilters::default().check(&m).is_ok());

        let filters = MarketFilters {
            min_volume_24h: dec!(25000),
            min_liquidity: Decimal::ZERO,
        };
        assert_eq!(filters.check(&m), Err(RejectReason::LowVolume));

        let filters = MarketFilters {
            min_volume_24h: Decimal::ZERO,
            min_liquidity: dec!(5000),
        };
        assert_eq!(filters.check(&m), Err(RejectReason::LowLiquidity));
    }
}
