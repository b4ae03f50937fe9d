//! Order matching against book snapshots.
//!
//! Lifecycle: `New → PartiallyFilled → Filled`, with `Cancelled` (explicit)
//! and `Rejected` (fill refused by the gate) reachable from any active state.
//! Terminal orders move out of the resting set but stay queryable.
//!
//! Within one `match_orders` pass, limit orders go first and market orders
//! second, each group in id order. Liquidity taken from a level is tracked for
//! the rest of the pass so two orders never consume the same quantity.

use super::CostModels;
use crate::config::MarketFillPolicy;
use crate::domain::{
    IdGen, OrderAuditEntry, OrderEvent, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType,
    SimulatedOrder, Trade,
};
use crate::engine::accounting::{FillOutcome, PositionError};
use crate::engine::order_book::{BookSide, Depth};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("order quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("limit price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is not active (status: {1:?})")]
    OrderNotActive(OrderId, OrderStatus),

    #[error("latency {latency} pushes order time past {now}")]
    TimeOverflow { now: DateTime<Utc>, latency: Duration },
}

/// Liquidity already taken from each level during the current pass.
type Consumed = HashMap<(BookSide, Decimal), Decimal>;

#[derive(Debug)]
pub struct OrderMatchingEngine {
    resting: BTreeMap<OrderId, SimulatedOrder>,
    finished: BTreeMap<OrderId, SimulatedOrder>,
    costs: CostModels,
    market_fill_policy: MarketFillPolicy,
    ids: IdGen,
    audit_trail: Vec<OrderAuditEntry>,
    pending_events: Vec<OrderEvent>,
    rejected_count: usize,
}

impl OrderMatchingEngine {
    pub fn new(costs: CostModels, market_fill_policy: MarketFillPolicy) -> Self {
        Self {
            resting: BTreeMap::new(),
            finished: BTreeMap::new(),
            costs,
            market_fill_policy,
            ids: IdGen::default(),
            audit_trail: Vec::new(),
            pending_events: Vec::new(),
            rejected_count: 0,
        }
    }

    // ── Public API ─────────────────────────────────────────────────────

    /// Accept an order. Its effective creation time is `now` plus sampled latency;
    /// it cannot match before then.
    pub fn place_order(
        &mut self,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderId, OrderError> {
        if request.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(request.quantity));
        }
        if let OrderType::Limit { price } = request.order_type {
            if price <= Decimal::ZERO {
                return Err(OrderError::InvalidPrice(price));
            }
        }
        if request.symbol.trim().is_empty() {
            return Err(OrderError::UnknownSymbol(request.symbol));
        }

        let latency = self.costs.latency.latency();
        let created_at = now
            .checked_add_signed(latency)
            .ok_or(OrderError::TimeOverflow { now, latency })?;
        let id = self.ids.next_order_id();
        let order = SimulatedOrder {
            id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::New,
            created_at,
        };
        debug!(
            order = %id,
            symbol = %order.symbol,
            side = ?order.side,
            qty = %order.quantity,
            %created_at,
            "order placed"
        );
        self.pending_events.push(OrderEvent {
            order_id: id,
            symbol: order.symbol.clone(),
            status: OrderStatus::New,
            filled_quantity: Decimal::ZERO,
            timestamp: now,
        });
        self.resting.insert(id, order);
        Ok(id)
    }

    /// Cancel a resting order. Cancelling a finished or unknown order is an error.
    pub fn cancel_order(&mut self, id: OrderId, now: DateTime<Utc>) -> Result<(), OrderError> {
        if let Some(done) = self.finished.get(&id) {
            return Err(OrderError::OrderNotActive(id, done.status));
        }
        let mut order = self.resting.remove(&id).ok_or(OrderError::OrderNotFound(id))?;
        self.transition(&mut order, OrderStatus::Cancelled, now, "cancelled by strategy");
        self.finished.insert(id, order);
        Ok(())
    }

    /// Match every eligible resting order for `depth.symbol` against the snapshot.
    ///
    /// Each prospective fill is offered to `gate` first; a refusal rejects the
    /// order and discards that fill. The snapshot is never mutated.
    pub fn match_orders<G>(&mut self, depth: &Depth, now: DateTime<Utc>, mut gate: G) -> Vec<Trade>
    where
        G: FnMut(&Trade) -> Result<FillOutcome, PositionError>,
    {
        let eligible = |o: &SimulatedOrder| o.symbol == depth.symbol && o.created_at <= now;
        let limits = self
            .resting
            .values()
            .filter(|o| !o.is_market() && eligible(*o))
            .map(|o| o.id);
        let markets = self
            .resting
            .values()
            .filter(|o| o.is_market() && eligible(*o))
            .map(|o| o.id);
        let queue: Vec<OrderId> = limits.chain(markets).collect();

        let mut consumed = Consumed::new();
        let mut trades = Vec::new();
        for id in queue {
            let Some(mut order) = self.resting.remove(&id) else {
                continue;
            };
            self.fill_order(&mut order, depth, now, &mut consumed, &mut gate, &mut trades);
            if order.is_active() {
                self.resting.insert(id, order);
            } else {
                self.finished.insert(id, order);
            }
        }
        trades
    }

    /// Look up any order, resting or finished.
    pub fn order(&self, id: OrderId) -> Option<&SimulatedOrder> {
        self.resting.get(&id).or_else(|| self.finished.get(&id))
    }

    pub fn resting_orders(&self) -> impl Iterator<Item = &SimulatedOrder> {
        self.resting.values()
    }

    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected_count
    }

    /// Order notifications accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn fill_order<G>(
        &mut self,
        order: &mut SimulatedOrder,
        depth: &Depth,
        now: DateTime<Utc>,
        consumed: &mut Consumed,
        gate: &mut G,
        trades: &mut Vec<Trade>,
    ) where
        G: FnMut(&Trade) -> Result<FillOutcome, PositionError>,
    {
        let side = BookSide::opposing(order.side);
        let limit = order.limit_price();
        let walk = limit.is_some() || self.market_fill_policy == MarketFillPolicy::WalkBook;
        // Best-level market orders only ever see level 0; if this pass already
        // drained it, the order rests until the next snapshot.
        let levels = depth.levels(side);
        let levels = if walk { levels } else { &levels[..levels.len().min(1)] };

        for level in levels {
            let remaining = order.remaining_quantity();
            if remaining <= Decimal::ZERO {
                break;
            }
            if let Some(limit_price) = limit {
                if !crosses(order.side, level.price, limit_price) {
                    break;
                }
            }
            let used = consumed
                .get(&(side, level.price))
                .copied()
                .unwrap_or(Decimal::ZERO);
            let available = level.quantity - used;
            if available <= Decimal::ZERO {
                continue;
            }

            // A best-level market fill takes the whole remainder at this price.
            let quantity = if walk { remaining.min(available) } else { remaining };
            let trade = self.build_trade(order, level.price, quantity, now);

            match gate(&trade) {
                Ok(outcome) => {
                    *consumed.entry((side, level.price)).or_insert(Decimal::ZERO) +=
                        quantity.min(available);
                    order.filled_quantity += quantity;
                    let next = if order.filled_quantity >= order.quantity {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    debug!(
                        order = %order.id,
                        trade = %trade.id,
                        price = %trade.price,
                        qty = %trade.quantity,
                        realized = %outcome.realized_pnl,
                        "fill"
                    );
                    self.transition(order, next, now, "fill");
                    trades.push(trade);
                }
                Err(e) => {
                    warn!(order = %order.id, error = %e, "fill refused, order rejected");
                    self.rejected_count += 1;
                    self.transition(order, OrderStatus::Rejected, now, &e.to_string());
                    return;
                }
            }

        }
    }

    fn build_trade(
        &mut self,
        order: &SimulatedOrder,
        level_price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Trade {
        let price = level_price + self.costs.slippage.slippage(level_price, quantity, order.side);
        let fee = self.costs.fee.fee(price, quantity);
        Trade {
            id: self.ids.next_trade_id(),
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            quantity,
            fee,
            timestamp: now,
        }
    }

    /// Apply a legal status change, recording it in the audit trail and as a notification.
    fn transition(
        &mut self,
        order: &mut SimulatedOrder,
        to: OrderStatus,
        now: DateTime<Utc>,
        reason: &str,
    ) {
        let from = order.status;
        if !from.can_transition_to(to) {
            return;
        }
        order.status = to;
        self.audit_trail.push(OrderAuditEntry {
            order_id: order.id,
            timestamp: now,
            from_status: from,
            to_status: to,
            reason: reason.to_string(),
        });
        self.pending_events.push(OrderEvent {
            order_id: order.id,
            symbol: order.symbol.clone(),
            status: to,
            filled_quantity: order.filled_quantity,
            timestamp: now,
        });
    }
}

/// Whether a level at `level_price` satisfies a limit on `side`.
fn crosses(side: OrderSide, level_price: Decimal, limit_price: Decimal) -> bool {
    match side {
        OrderSide::Buy => level_price <= limit_price,
        OrderSide::Sell => level_price >= limit_price,
    }
}
