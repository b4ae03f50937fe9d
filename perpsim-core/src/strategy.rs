//! Strategy interface.
//!
//! A strategy sees market data one point at a time and acts through a
//! `StrategyContext`: it can place and cancel simulated orders and read the
//! account, but it cannot reach the books or the clock directly.

use crate::config::BacktestConfig;
use crate::domain::{
    LiquidationEvent, MarketDataPoint, OrderEvent, OrderId, OrderRequest, OrderSide, Position,
    PriceLevel, SimulatedOrder, Trade,
};
use crate::engine::accounting::{PositionManager, PriceMap};
use crate::engine::execution::{OrderError, OrderMatchingEngine};
use crate::engine::order_book::OrderBook;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy failed: {0}")]
    Failed(String),

    #[error("strategy order rejected: {0}")]
    Order(#[from] OrderError),
}

/// What a strategy may see and do during a callback.
pub struct StrategyContext<'a> {
    now: DateTime<Utc>,
    symbols: &'a [String],
    matching: &'a mut OrderMatchingEngine,
    positions: &'a PositionManager,
    books: &'a BTreeMap<String, OrderBook>,
    marks: &'a PriceMap,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        symbols: &'a [String],
        matching: &'a mut OrderMatchingEngine,
        positions: &'a PositionManager,
        books: &'a BTreeMap<String, OrderBook>,
        marks: &'a PriceMap,
    ) -> Self {
        Self {
            now,
            symbols,
            matching,
            positions,
            books,
            marks,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Submit an order for one of the configured symbols.
    pub fn place_order(&mut self, request: OrderRequest) -> Result<OrderId, OrderError> {
        if !self.symbols.iter().any(|s| *s == request.symbol) {
            return Err(OrderError::UnknownSymbol(request.symbol));
        }
        self.matching.place_order(request, self.now)
    }

    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), OrderError> {
        self.matching.cancel_order(id, self.now)
    }

    pub fn order(&self, id: OrderId) -> Option<&SimulatedOrder> {
        self.matching.order(id)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.matching.resting_orders()
    }

    pub fn balance(&self) -> Decimal {
        self.positions.balance()
    }

    pub fn equity(&self) -> Decimal {
        self.positions.equity()
    }

    pub fn available_margin(&self) -> Decimal {
        self.positions.available_margin()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.position(symbol)
    }

    pub fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    pub fn best_bid(&self, symbol: &str) -> Option<PriceLevel> {
        self.books.get(symbol).and_then(|b| b.best_bid())
    }

    pub fn best_ask(&self, symbol: &str) -> Option<PriceLevel> {
        self.books.get(symbol).and_then(|b| b.best_ask())
    }
}

/// Trading logic driven by the backtest loop.
///
/// Only `on_tick` is required. Trade and order notifications arrive on the
/// tick after they happen.
pub trait Strategy: Send {
    fn initialize(&mut self, _config: &BacktestConfig) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_tick(
        &mut self,
        point: &MarketDataPoint,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError>;

    fn on_trade(
        &mut self,
        _trade: &Trade,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_order_event(
        &mut self,
        _event: &OrderEvent,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_liquidation(
        &mut self,
        _event: &LiquidationEvent,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Called once when the run ends, whether completed or cancelled.
    fn stop(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Never trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn on_tick(
        &mut self,
        _: &MarketDataPoint,
        _: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// Market-buys `quantity` of each symbol on its first priced data point, then holds.
#[derive(Debug, Clone)]
pub struct BuyAndHold {
    quantity: Decimal,
    entered: BTreeSet<String>,
}

impl BuyAndHold {
    pub fn new(quantity: Decimal) -> Self {
        Self {
            quantity,
            entered: BTreeSet::new(),
        }
    }
}

impl Strategy for BuyAndHold {
    fn initialize(&mut self, _config: &BacktestConfig) -> Result<(), StrategyError> {
        if self.quantity <= Decimal::ZERO {
            return Err(StrategyError::Failed(format!(
                "buy_and_hold quantity must be positive, got {}",
                self.quantity
            )));
        }
        self.entered.clear();
        Ok(())
    }

    fn on_tick(
        &mut self,
        point: &MarketDataPoint,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        if self.entered.contains(&point.symbol) || ctx.mark_price(&point.symbol).is_none() {
            return Ok(());
        }
        ctx.place_order(OrderRequest::market(
            point.symbol.clone(),
            OrderSide::Buy,
            self.quantity,
        ))?;
        self.entered.insert(point.symbol.clone());
        Ok(())
    }
}
