//! Lifecycle events and alert delivery.
//!
//! Event delivery is best-effort: [`EventSink::emit`] is synchronous, never blocks on a
//! slow consumer and never fails the caller.

mod webhook;

pub use webhook::WebhookNotifier;

use crate::persistence::{Position, PositionStatus, Side};
use crate::risk::CloseReason;
use crate::strategy::OpportunityScore;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Condensed opportunity carried by scan-complete events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunitySummary {
    pub market_id: String,
    pub market_name: String,
    pub total_score: u8,
    pub estimated_net_profit: Decimal,
    pub spread_percent: Decimal,
}

impl From<&OpportunityScore> for OpportunitySummary {
    fn from(opp: &OpportunityScore) -> Self {
        Self {
            market_id: opp.market_id.clone(),
            market_name: opp.market_name.clone(),
            total_score: opp.total_score,
            estimated_net_profit: opp.estimated_net_profit,
            spread_percent: opp.spread_percent,
        }
    }
}

/// Lifecycle event. Serializes as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingEvent {
    ScanComplete {
        count: usize,
        top: Vec<OpportunitySummary>,
    },
    PositionOpened {
        position_id: i64,
        market_id: String,
        market_name: String,
        amount_yes: Decimal,
        amount_no: Decimal,
        price_yes: Decimal,
        price_no: Decimal,
    },
    PositionClosed {
        position_id: i64,
        market_id: String,
        reason: CloseReason,
        status: PositionStatus,
        pnl: Decimal,
        pnl_percent: Decimal,
    },
    LegClosed {
        position_id: i64,
        market_id: String,
        side: Side,
        reason: CloseReason,
        price: Decimal,
        value: Decimal,
    },
    TradingStatus {
        is_running: bool,
        is_paused: bool,
    },
}

impl TradingEvent {
    pub fn position_opened(position: &Position) -> Self {
        TradingEvent::PositionOpened {
            position_id: position.id,
            market_id: position.market_id.clone(),
            market_name: position.market_name.clone(),
            amount_yes: position.amount_yes,
            amount_no: position.amount_no,
            price_yes: position.entry_price_yes,
            price_no: position.entry_price_no,
        }
    }

    pub fn position_closed(position: &Position, reason: CloseReason) -> Self {
        TradingEvent::PositionClosed {
            position_id: position.id,
            market_id: position.market_id.clone(),
            reason,
            status: position.status,
            pnl: position.pnl,
            pnl_percent: position.pnl_percent,
        }
    }

    /// Event type tag, as serialized.
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::ScanComplete { .. } => "SCAN_COMPLETE",
            TradingEvent::PositionOpened { .. } => "POSITION_OPENED",
            TradingEvent::PositionClosed { .. } => "POSITION_CLOSED",
            TradingEvent::LegClosed { .. } => "LEG_CLOSED",
            TradingEvent::TradingStatus { .. } => "TRADING_STATUS",
        }
    }
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TradingEvent);
}

/// Publishes events on a tokio broadcast channel.
///
/// Lagging subscribers lose the oldest events; with no subscribers events are dropped.
pub struct BroadcastSink {
    tx: broadcast::Sender<TradingEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: TradingEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(kind = e.0.kind(), "No event subscribers");
        }
    }
}

/// Writes each event to the log as JSON.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: TradingEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(kind = event.kind(), "[EVENT] {}", json),
            Err(e) => debug!(kind = event.kind(), error = %e, "Failed to serialize event"),
        }
    }
}

/// Forwards every event to each inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: TradingEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// External alert channel for high-scoring opportunities.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_opportunity(&self, opportunity: &OpportunityScore) -> anyhow::Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<TradingEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<TradingEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, kind: &str) -> usize {
            self.events().iter().filter(|e| e.kind() == kind).count()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: TradingEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
