//! Simulated orders, their lifecycle states, and order notifications.

use super::ids::OrderId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    /// Fill at the limit price or better, walking the opposing side.
    Limit { price: Decimal },
    /// Fill against the opposing side at whatever price is there.
    Market,
}

/// Order lifecycle states.
///
/// `New → PartiallyFilled → Filled`, or `New/PartiallyFilled → Cancelled | Rejected`.
/// Filled, Cancelled and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    /// A fill was refused (insufficient margin). The run continues.
    Rejected,
}

impl OrderStatus {
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::New, OrderStatus::PartiallyFilled)
            | (OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled) => true,
            (from, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected) => {
                from.is_active()
            }
            _ => false,
        }
    }
}

/// What a strategy asks for. The matching engine turns it into a `SimulatedOrder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit { price },
            quantity,
        }
    }
}

/// A resting (or finished) order inside the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedOrder {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    /// Effective creation time, already shifted by the latency model.
    pub created_at: DateTime<Utc>,
}

impl SimulatedOrder {
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn limit_price(&self) -> Option<Decimal> {
        match self.order_type {
            OrderType::Limit { price } => Some(price),
            OrderType::Market => None,
        }
    }

    pub fn is_market(&self) -> bool {
        matches!(self.order_type, OrderType::Market)
    }
}

/// Notification of an order state change, delivered to the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub reason: String,
}
