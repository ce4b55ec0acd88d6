//! Position, trade and stored-opportunity records owned by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a position. Anything other than `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Active,
    Closed,
    Liquidated,
}

/// Which legs of a position are still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActiveSide {
    Yes,
    No,
    Both,
}

/// One outcome leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    Entry,
    Exit,
    PartialExit,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(anyhow::anyhow!(
                        "invalid {} value '{}'",
                        stringify!($ty),
                        other
                    )),
                }
            }
        }
    };
}

text_enum!(PositionStatus { Active => "ACTIVE", Closed => "CLOSED", Liquidated => "LIQUIDATED" });
text_enum!(ActiveSide { Yes => "YES", No => "NO", Both => "BOTH" });
text_enum!(Side { Yes => "YES", No => "NO" });
text_enum!(TradeType { Entry => "ENTRY", Exit => "EXIT", PartialExit => "PARTIAL_EXIT" });

/// A hedged two-leg position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub market_id: String,
    pub market_name: String,
    pub token_yes: String,
    pub token_no: String,

    pub entry_price_yes: Decimal,
    pub entry_price_no: Decimal,
    /// Capital allocated to each leg (zero once the leg is closed).
    pub amount_yes: Decimal,
    pub amount_no: Decimal,

    pub current_price_yes: Decimal,
    pub current_price_no: Decimal,
    pub current_value_yes: Decimal,
    pub current_value_no: Decimal,

    pub pnl: Decimal,
    pub pnl_percent: Decimal,

    pub status: PositionStatus,
    pub active_side: ActiveSide,
    pub is_yes_closed: bool,
    pub is_no_closed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    pub fn is_leg_closed(&self, side: Side) -> bool {
        match side {
            Side::Yes => self.is_yes_closed,
            Side::No => self.is_no_closed,
        }
    }

    pub fn token(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.token_yes,
            Side::No => &self.token_no,
        }
    }

    pub fn entry_price(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.entry_price_yes,
            Side::No => self.entry_price_no,
        }
    }

    pub fn amount(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.amount_yes,
            Side::No => self.amount_no,
        }
    }

    pub fn current_price(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.current_price_yes,
            Side::No => self.current_price_no,
        }
    }

    pub fn current_value(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.current_value_yes,
            Side::No => self.current_value_no,
        }
    }

    /// Legs whose closed flag is still false.
    pub fn open_legs(&self) -> Vec<Side> {
        [Side::Yes, Side::No]
            .into_iter()
            .filter(|side| !self.is_leg_closed(*side))
            .collect()
    }

    /// Mark one leg closed and zero its holdings.
    pub fn mark_leg_closed(&mut self, side: Side) {
        match side {
            Side::Yes => {
                self.is_yes_closed = true;
                self.amount_yes = Decimal::ZERO;
                self.current_value_yes = Decimal::ZERO;
            }
            Side::No => {
                self.is_no_closed = true;
                self.amount_no = Decimal::ZERO;
                self.current_value_no = Decimal::ZERO;
            }
        }
        self.active_side = match (self.is_yes_closed, self.is_no_closed) {
            (true, false) => ActiveSide::No,
            (false, true) => ActiveSide::Yes,
            _ => ActiveSide::Both,
        };
    }

    /// Record a new market price for one leg and revalue it.
    pub fn set_leg_price(&mut self, side: Side, price: Decimal) {
        let entry = self.entry_price(side);
        let value = if entry > Decimal::ZERO {
            self.amount(side) * price / entry
        } else {
            self.amount(side)
        };
        match side {
            Side::Yes => {
                self.current_price_yes = price;
                self.current_value_yes = value;
            }
            Side::No => {
                self.current_price_no = price;
                self.current_value_no = value;
            }
        }
    }

    /// Recompute P&L over the open legs.
    pub fn recompute_pnl(&mut self) {
        let (initial, current) = self
            .open_legs()
            .into_iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(i, c), side| {
                (i + self.amount(side), c + self.current_value(side))
            });

        self.pnl = current - initial;
        self.pnl_percent = crate::utils::percent_of(self.pnl, initial);
    }
}

/// Values for a position about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub market_id: String,
    pub market_name: String,
    pub token_yes: String,
    pub token_no: String,
    pub entry_price_yes: Decimal,
    pub entry_price_no: Decimal,
    pub amount_yes: Decimal,
    pub amount_no: Decimal,
}

/// An executed leg action. Trades are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub position_id: i64,
    pub market_id: String,
    pub market_name: String,
    pub side: Side,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub order_id: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Values for a trade about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub position_id: i64,
    pub market_id: String,
    pub market_name: String,
    pub side: Side,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub order_id: Option<String>,
}

impl NewTrade {
    /// Trade against `position` for one leg.
    pub fn for_position(
        position: &Position,
        side: Side,
        trade_type: TradeType,
        amount: Decimal,
        price: Decimal,
        total_value: Decimal,
    ) -> Self {
        Self {
            position_id: position.id,
            market_id: position.market_id.clone(),
            market_name: position.market_name.clone(),
            side,
            trade_type,
            amount,
            price,
            total_value,
            order_id: None,
        }
    }

    pub fn with_order_id(mut self, order_id: Option<String>) -> Self {
        self.order_id = order_id;
        self
    }
}

/// Persisted summary of a detected opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOpportunity {
    pub id: i64,
    pub market_id: String,
    pub market_name: String,
    pub price_yes: Decimal,
    pub price_no: Decimal,
    /// |1 - (price_yes + price_no)|
    pub divergence: Decimal,
    pub score: u8,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub is_active: bool,
    pub is_traded: bool,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
