//! Margin accounting: positions, balance, funding and liquidation.
//!
//! Opening exposure does not debit notional. The balance moves only by fees,
//! realized PnL and funding, and equity is balance plus unrealized PnL. In
//! isolated mode each position reserves its initial margin at open; the
//! reservation reduces what other positions may use and caps what a
//! liquidation of that position can lose.

use crate::config::BacktestConfig;
use crate::domain::{LiquidationEvent, MarginMode, OrderSide, Position, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Latest mark price per symbol.
pub type PriceMap = BTreeMap<String, Decimal>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("insufficient margin for {symbol}: required {required}, available {available}")]
    InsufficientMargin {
        symbol: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("{0} already holds opposite exposure; reduce it first")]
    OppositeExposure(String),

    #[error("invalid trade: {0}")]
    InvalidTrade(String),
}

/// What applying one trade did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FillOutcome {
    pub opened: Decimal,
    pub closed: Decimal,
    pub realized_pnl: Decimal,
}

/// Balance, open positions and running totals. One per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
    /// Net funding paid; negative when funding was received.
    pub funding_paid: Decimal,
}

impl Account {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            positions: BTreeMap::new(),
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            funding_paid: Decimal::ZERO,
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn equity(&self) -> Decimal {
        self.balance + self.unrealized_pnl()
    }

    pub fn allocated_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.allocated_margin).sum()
    }
}

#[derive(Debug, Clone)]
pub struct PositionManager {
    account: Account,
    margin_mode: MarginMode,
    leverage: Decimal,
    margin_ratios: BTreeMap<String, Decimal>,
    default_margin_ratio: Decimal,
    maintenance_fraction: Decimal,
}

impl PositionManager {
    /// Cross or isolated manager with a 1% default margin ratio and 50% maintenance.
    pub fn new(initial_capital: Decimal, margin_mode: MarginMode, leverage: Decimal) -> Self {
        Self {
            account: Account::new(initial_capital),
            margin_mode,
            leverage,
            margin_ratios: BTreeMap::new(),
            default_margin_ratio: Decimal::new(1, 2),
            maintenance_fraction: Decimal::new(5, 1),
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            account: Account::new(config.initial_capital),
            margin_mode: config.margin_mode,
            leverage: config.leverage,
            margin_ratios: config.margin_ratios.clone(),
            default_margin_ratio: config.default_margin_ratio,
            maintenance_fraction: config.maintenance_margin_fraction,
        }
    }

    pub fn set_margin_ratio(&mut self, symbol: impl Into<String>, ratio: Decimal) {
        self.margin_ratios.insert(symbol.into(), ratio);
    }

    pub fn set_maintenance_fraction(&mut self, fraction: Decimal) {
        self.maintenance_fraction = fraction;
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn balance(&self) -> Decimal {
        self.account.balance
    }

    pub fn equity(&self) -> Decimal {
        self.account.equity()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.account.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.account.positions.values()
    }

    pub fn margin_mode(&self) -> MarginMode {
        self.margin_mode
    }

    pub fn margin_ratio(&self, symbol: &str) -> Decimal {
        self.margin_ratios
            .get(symbol)
            .copied()
            .unwrap_or(self.default_margin_ratio)
    }

    pub fn maintenance_ratio(&self, symbol: &str) -> Decimal {
        self.margin_ratio(symbol) * self.maintenance_fraction
    }

    /// `price × quantity × margin_ratio[symbol]`
    pub fn required_margin(&self, trade: &Trade) -> Decimal {
        trade.price * trade.quantity * self.margin_ratio(&trade.symbol)
    }

    /// Cross: equity. Isolated: balance not yet reserved by any position.
    pub fn available_margin(&self) -> Decimal {
        match self.margin_mode {
            MarginMode::Cross => self.account.equity(),
            MarginMode::Isolated => self.account.balance - self.account.allocated_margin(),
        }
    }

    // ── Trades ─────────────────────────────────────────────────────────

    /// Net a trade into the account.
    ///
    /// Opposite exposure is reduced first; any remainder opens the trade's side
    /// and is margin-checked. On error the account is left exactly as it was.
    pub fn apply_trade(&mut self, trade: &Trade) -> Result<FillOutcome, PositionError> {
        validate_trade(trade)?;

        let opposite = self
            .account
            .positions
            .get(&trade.symbol)
            .map(|p| match trade.side {
                OrderSide::Buy => p.short_quantity,
                OrderSide::Sell => p.long_quantity,
            })
            .unwrap_or(Decimal::ZERO);

        if opposite.is_zero() {
            self.open_or_increase(trade)?;
            return Ok(FillOutcome {
                opened: trade.quantity,
                ..FillOutcome::default()
            });
        }

        let closed = opposite.min(trade.quantity);
        let remainder = trade.quantity - closed;
        if remainder.is_zero() {
            let realized_pnl = self.close_or_reduce(trade)?;
            return Ok(FillOutcome {
                opened: Decimal::ZERO,
                closed,
                realized_pnl,
            });
        }

        // A flip: close the whole opposite leg, then open the remainder.
        let close_fee = trade.fee * closed / trade.quantity;
        let closing = Trade {
            quantity: closed,
            fee: close_fee,
            ..trade.clone()
        };
        let opening = Trade {
            quantity: remainder,
            fee: trade.fee - close_fee,
            ..trade.clone()
        };

        let saved = self.account.clone();
        let realized_pnl = self.close_or_reduce(&closing)?;
        if let Err(e) = self.open_or_increase(&opening) {
            self.account = saved;
            return Err(e);
        }
        Ok(FillOutcome {
            opened: remainder,
            closed,
            realized_pnl,
        })
    }

    /// Increase the leg on the trade's side, updating the VWAP entry.
    ///
    /// Fails without touching the account when available margin is short.
    pub fn open_or_increase(&mut self, trade: &Trade) -> Result<(), PositionError> {
        validate_trade(trade)?;

        if let Some(existing) = self.account.positions.get(&trade.symbol) {
            let opposite = match trade.side {
                OrderSide::Buy => existing.short_quantity,
                OrderSide::Sell => existing.long_quantity,
            };
            if !opposite.is_zero() {
                return Err(PositionError::OppositeExposure(trade.symbol.clone()));
            }
        }

        let required = self.required_margin(trade);
        let available = self.available_margin();
        if available < required {
            return Err(PositionError::InsufficientMargin {
                symbol: trade.symbol.clone(),
                required,
                available,
            });
        }

        let (leverage, mode) = (self.leverage, self.margin_mode);
        let position = self
            .account
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position::new(trade.symbol.clone(), leverage, mode));

        let leg = match trade.side {
            OrderSide::Buy => &mut position.long_quantity,
            OrderSide::Sell => &mut position.short_quantity,
        };
        let before = *leg;
        *leg += trade.quantity;
        position.entry_price = (position.entry_price * before + trade.price * trade.quantity)
            / (before + trade.quantity);
        if mode == MarginMode::Isolated {
            position.allocated_margin += required;
        }
        refresh_unrealized(position);

        self.account.balance -= trade.fee;
        self.account.fees_paid += trade.fee;
        debug!(
            symbol = %trade.symbol,
            side = ?trade.side,
            qty = %trade.quantity,
            price = %trade.price,
            "position increased"
        );
        Ok(())
    }

    /// Reduce the leg opposite the trade's side and realize PnL on the closed quantity.
    ///
    /// Returns the realized PnL before fees.
    pub fn close_or_reduce(&mut self, trade: &Trade) -> Result<Decimal, PositionError> {
        validate_trade(trade)?;
        let position = self
            .account
            .positions
            .get_mut(&trade.symbol)
            .ok_or_else(|| PositionError::PositionNotFound(trade.symbol.clone()))?;

        let leg = match trade.side {
            OrderSide::Sell => &mut position.long_quantity,
            OrderSide::Buy => &mut position.short_quantity,
        };
        let before = *leg;
        let closed = before.min(trade.quantity);
        *leg -= closed;

        let mut pnl = closed * (trade.price - position.entry_price);
        if trade.side == OrderSide::Buy {
            pnl = -pnl;
        }

        if !before.is_zero() && !position.allocated_margin.is_zero() {
            let released = position.allocated_margin * closed / before;
            position.allocated_margin -= released;
        }
        refresh_unrealized(position);
        let flat = position.is_flat();

        self.account.balance += pnl - trade.fee;
        self.account.realized_pnl += pnl;
        self.account.fees_paid += trade.fee;
        if flat {
            self.account.positions.remove(&trade.symbol);
        }
        debug!(symbol = %trade.symbol, closed = %closed, pnl = %pnl, "position reduced");
        Ok(pnl)
    }

    // ── Market updates ─────────────────────────────────────────────────

    /// Refresh unrealized PnL for every position with a known price.
    pub fn mark_to_market(&mut self, prices: &PriceMap) {
        for (symbol, position) in self.account.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                position.mark_price = Some(price);
                refresh_unrealized(position);
            }
        }
    }

    /// Settle funding for one symbol. Longs pay positive rates, shorts receive.
    ///
    /// Notional uses the mark price when known, the entry price otherwise.
    /// Returns the amount paid (negative when received). No position, no-op.
    pub fn apply_funding(&mut self, symbol: &str, rate: Decimal) -> Decimal {
        let Some(position) = self.account.positions.get(symbol) else {
            return Decimal::ZERO;
        };
        let price = position.mark_price.unwrap_or(position.entry_price);
        let payment = position.net_quantity() * price * rate;
        self.account.balance -= payment;
        self.account.funding_paid += payment;
        debug!(symbol, rate = %rate, payment = %payment, "funding settled");
        payment
    }

    /// Force-close every position whose margin ratio fell below maintenance.
    ///
    /// Positions without a price in `prices` are skipped.
    pub fn check_liquidation(
        &mut self,
        prices: &PriceMap,
        timestamp: DateTime<Utc>,
    ) -> Vec<LiquidationEvent> {
        self.mark_to_market(prices);

        let symbols: Vec<String> = self.account.positions.keys().cloned().collect();
        let mut events = Vec::new();
        for symbol in symbols {
            let Some(&price) = prices.get(&symbol) else {
                continue;
            };
            let Some(position) = self.account.positions.get(&symbol) else {
                continue;
            };
            let notional = position.notional_at(price);
            if notional.is_zero() {
                continue;
            }
            let current = match self.margin_mode {
                MarginMode::Cross => self.account.equity() / notional,
                MarginMode::Isolated => {
                    (position.allocated_margin + position.unrealized_at(price)) / notional
                }
            };
            let maintenance = self.maintenance_ratio(&symbol);
            if current >= maintenance {
                continue;
            }

            let mut pnl = position.unrealized_at(price);
            if self.margin_mode == MarginMode::Isolated {
                pnl = pnl.max(-position.allocated_margin);
            }
            let quantity = position.net_quantity();
            self.account.balance += pnl;
            self.account.realized_pnl += pnl;
            self.account.positions.remove(&symbol);
            warn!(
                symbol = %symbol,
                price = %price,
                margin_ratio = %current,
                maintenance = %maintenance,
                "position liquidated"
            );
            events.push(LiquidationEvent {
                symbol,
                timestamp,
                price,
                quantity,
                realized_pnl: pnl,
            });
        }
        events
    }
}

fn validate_trade(trade: &Trade) -> Result<(), PositionError> {
    if trade.quantity <= Decimal::ZERO {
        return Err(PositionError::InvalidTrade(format!(
            "non-positive quantity {}",
            trade.quantity
        )));
    }
    if trade.price <= Decimal::ZERO {
        return Err(PositionError::InvalidTrade(format!(
            "non-positive price {}",
            trade.price
        )));
    }
    Ok(())
}

fn refresh_unrealized(position: &mut Position) {
    position.unrealized_pnl = match position.mark_price {
        Some(mark) if !position.is_flat() => position.unrealized_at(mark),
        _ => Decimal::ZERO,
    };
}
