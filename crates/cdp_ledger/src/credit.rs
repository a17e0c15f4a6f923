//! Credit-score notifications for the enclosing lending system

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::position::PositionId;

/// Event reported to the credit system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum CreditEvent {
    /// A position was liquidated
    PositionLiquidated {
        /// Liquidated position
        position_id: PositionId,
        /// Penalty charged, in USD
        penalty_usd: Decimal,
        /// Liquidator, when liquidated on demand rather than by a scan
        liquidated_by: Option<String>,
    },
}

/// Receives credit events for borrowers
pub trait CreditEventSink: Send + Sync {
    /// Record an event against `owner`
    fn record(&self, owner: &str, event: &CreditEvent);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCreditSink;

impl CreditEventSink for NoopCreditSink {
    fn record(&self, _owner: &str, _event: &CreditEvent) {}
}

/// Sink that keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingCreditSink {
    events: Mutex<Vec<(String, CreditEvent)>>,
}

impl RecordingCreditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far
    #[must_use]
    pub fn events(&self) -> Vec<(String, CreditEvent)> {
        self.events.lock().clone()
    }

    /// Events recorded against one owner
    #[must_use]
    pub fn events_for(&self, owner: &str) -> Vec<CreditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(recorded_owner, _)| recorded_owner == owner)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl CreditEventSink for RecordingCreditSink {
    fn record(&self, owner: &str, event: &CreditEvent) {
        self.events.lock().push((owner.to_owned(), event.clone()));
    }
}
