use crate::domain::ids::{OrderId, TradeId};
use crate::domain::order::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Simulated execution. Immutable once created.
///
/// `price` is the executed price after slippage; `fee` is computed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}
