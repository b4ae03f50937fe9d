//! Simulated events and their scheduling priorities.

use crate::domain::{MarketDataPoint, OrderEvent, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Higher priority drains first among events with the same timestamp.
pub const PRIORITY_FUNDING: i32 = 30;
pub const PRIORITY_ORDER: i32 = 20;
pub const PRIORITY_TRADE: i32 = 20;
pub const PRIORITY_MARKET_DATA: i32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    MarketData(MarketDataPoint),
    Order(OrderEvent),
    Trade(Trade),
    Funding { symbol: String, rate: Decimal },
}

/// A timestamped event owned by the scheduler until drained.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub priority: i32,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, priority: i32, payload: EventPayload) -> Self {
        Self {
            timestamp,
            priority,
            payload,
        }
    }

    pub fn market_data(point: MarketDataPoint) -> Self {
        Self::new(point.timestamp, PRIORITY_MARKET_DATA, EventPayload::MarketData(point))
    }

    pub fn funding(timestamp: DateTime<Utc>, symbol: impl Into<String>, rate: Decimal) -> Self {
        Self::new(
            timestamp,
            PRIORITY_FUNDING,
            EventPayload::Funding {
                symbol: symbol.into(),
                rate,
            },
        )
    }

    pub fn order(event: OrderEvent) -> Self {
        Self::new(event.timestamp, PRIORITY_ORDER, EventPayload::Order(event))
    }

    pub fn trade(trade: Trade) -> Self {
        Self::new(trade.timestamp, PRIORITY_TRADE, EventPayload::Trade(trade))
    }
}
