//! Historical market data points.
//!
//! Every point carries a symbol, a timestamp and a strongly typed payload. The
//! driver dispatches on the payload variant; there is no runtime type probing.

use super::order::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price level of an order book: (price, quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Fieldless tag of a payload, used for data-type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Kline,
    Trade,
    Funding,
    OpenInterest,
    Depth,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::Kline,
        DataKind::Trade,
        DataKind::Funding,
        DataKind::OpenInterest,
        DataKind::Depth,
    ];
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A public trade printed on the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
}

/// Perpetual funding rate settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub rate: Decimal,
    #[serde(default)]
    pub next_funding_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub value: Decimal,
    pub notional: Decimal,
}

/// Incremental book update: each level overwrites its price, zero quantity removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

/// Typed payload of a market data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketPayload {
    Kline(Kline),
    Trade(TradePrint),
    Funding(FundingRate),
    OpenInterest(OpenInterest),
    Depth(DepthUpdate),
}

/// A single historical data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataPoint {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub payload: MarketPayload,
}

impl MarketDataPoint {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: MarketPayload,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            payload,
        }
    }

    pub fn kind(&self) -> DataKind {
        match self.payload {
            MarketPayload::Kline(_) => DataKind::Kline,
            MarketPayload::Trade(_) => DataKind::Trade,
            MarketPayload::Funding(_) => DataKind::Funding,
            MarketPayload::OpenInterest(_) => DataKind::OpenInterest,
            MarketPayload::Depth(_) => DataKind::Depth,
        }
    }

    /// Price usable for marking positions, if the payload carries one.
    pub fn mark_price(&self) -> Option<Decimal> {
        match &self.payload {
            MarketPayload::Kline(k) => Some(k.close),
            MarketPayload::Trade(t) => Some(t.price),
            _ => None,
        }
    }

    /// Reject points whose numbers cannot describe a real market.
    ///
    /// Malformed points are skipped by the driver, never fatal.
    pub fn validate(&self) -> Result<(), String> {
        match &self.payload {
            MarketPayload::Kline(k) => {
                if k.low <= Decimal::ZERO || k.high < k.low {
                    return Err(format!("kline low={} high={} is not a valid range", k.low, k.high));
                }
                if k.close < k.low || k.close > k.high || k.open < k.low || k.open > k.high {
                    return Err(format!("kline open/close outside [{}, {}]", k.low, k.high));
                }
                if k.volume < Decimal::ZERO {
                    return Err(format!("negative kline volume {}", k.volume));
                }
            }
            MarketPayload::Trade(t) => {
                if t.price <= Decimal::ZERO || t.quantity < Decimal::ZERO {
                    return Err(format!("trade print price={} qty={}", t.price, t.quantity));
                }
            }
            MarketPayload::Depth(d) => {
                if let Some(bad) = d
                    .bids
                    .iter()
                    .chain(d.asks.iter())
                    .find(|l| l.price <= Decimal::ZERO)
                {
                    return Err(format!("depth level with non-positive price {}", bad.price));
                }
            }
            MarketPayload::OpenInterest(oi) => {
                if oi.value < Decimal::ZERO {
                    return Err(format!("negative open interest {}", oi.value));
                }
            }
            MarketPayload::Funding(_) => {}
        }
        Ok(())
    }
}
