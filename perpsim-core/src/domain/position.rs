use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Collateral sharing between positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    /// All positions share the account's equity.
    #[default]
    Cross,
    /// Each position is backed only by the margin allocated to it at open.
    Isolated,
}

/// Net exposure in one symbol.
///
/// Netting is one-way: at most one of `long_quantity` / `short_quantity` is
/// non-zero at any time. A position with both legs at zero is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub long_quantity: Decimal,
    pub short_quantity: Decimal,
    /// Volume-weighted entry price of the open leg.
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub margin_mode: MarginMode,
    pub unrealized_pnl: Decimal,
    /// Margin reserved for this position (isolated mode only, zero otherwise).
    pub allocated_margin: Decimal,
    /// Last price used for marking, if any has been seen.
    pub mark_price: Option<Decimal>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, leverage: Decimal, margin_mode: MarginMode) -> Self {
        Self {
            symbol: symbol.into(),
            long_quantity: Decimal::ZERO,
            short_quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage,
            margin_mode,
            unrealized_pnl: Decimal::ZERO,
            allocated_margin: Decimal::ZERO,
            mark_price: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.long_quantity.is_zero() && self.short_quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.long_quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.short_quantity > Decimal::ZERO
    }

    /// Signed quantity: positive long, negative short.
    pub fn net_quantity(&self) -> Decimal {
        self.long_quantity - self.short_quantity
    }

    pub fn gross_quantity(&self) -> Decimal {
        self.long_quantity + self.short_quantity
    }

    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        self.net_quantity() * (price - self.entry_price)
    }

    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.gross_quantity() * price
    }
}

/// A forced close recorded by the liquidation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// Signed quantity that was closed: positive long, negative short.
    pub quantity: Decimal,
    pub realized_pnl: Decimal,
}
