//! Per-symbol price-level book.
//!
//! Each side keeps its levels in a `Vec` with a price → slot index. Inserting a
//! new price appends and marks the side dirty; the sort happens lazily the next
//! time an ordered view is requested, so a burst of updates costs one sort.
//! Overwrites and removals keep an already-sorted side sorted.
//!
//! The matching engine never sees the live book: it receives a `Depth`
//! snapshot, a sorted and immutable copy.

use crate::domain::{OrderSide, PriceLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    /// The side an order of `side` executes against.
    pub fn opposing(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => BookSide::Ask,
            OrderSide::Sell => BookSide::Bid,
        }
    }

    /// Whether `a` comes before `b` in this side's order.
    fn ahead(self, a: Decimal, b: Decimal) -> bool {
        match self {
            BookSide::Bid => a > b,
            BookSide::Ask => a < b,
        }
    }
}

#[derive(Debug, Clone)]
struct SideLevels {
    side: BookSide,
    levels: Vec<PriceLevel>,
    index: HashMap<Decimal, usize>,
    dirty: bool,
}

impl SideLevels {
    fn new(side: BookSide) -> Self {
        Self {
            side,
            levels: Vec::new(),
            index: HashMap::new(),
            dirty: false,
        }
    }

    fn upsert(&mut self, price: Decimal, quantity: Decimal) {
        if quantity <= Decimal::ZERO {
            self.remove(price);
            return;
        }
        match self.index.get(&price) {
            Some(&slot) => self.levels[slot].quantity = quantity,
            None => {
                self.index.insert(price, self.levels.len());
                self.levels.push(PriceLevel::new(price, quantity));
                self.dirty = true;
            }
        }
    }

    fn remove(&mut self, price: Decimal) {
        let Some(slot) = self.index.remove(&price) else {
            return;
        };
        self.levels.remove(slot);
        for (i, level) in self.levels.iter().enumerate().skip(slot) {
            self.index.insert(level.price, i);
        }
    }

    fn ensure_sorted(&mut self) {
        if !self.dirty {
            return;
        }
        match self.side {
            BookSide::Bid => self.levels.sort_by(|a, b| b.price.cmp(&a.price)),
            BookSide::Ask => self.levels.sort_by(|a, b| a.price.cmp(&b.price)),
        }
        self.index.clear();
        for (i, level) in self.levels.iter().enumerate() {
            self.index.insert(level.price, i);
        }
        self.dirty = false;
    }

    fn sorted(&mut self, limit: usize) -> &[PriceLevel] {
        self.ensure_sorted();
        let n = limit.min(self.levels.len());
        &self.levels[..n]
    }

    fn best(&self) -> Option<PriceLevel> {
        if !self.dirty {
            return self.levels.first().copied();
        }
        let side = self.side;
        self.levels
            .iter()
            .copied()
            .reduce(|best, l| if side.ahead(l.price, best.price) { l } else { best })
    }

    fn clear(&mut self) {
        self.levels.clear();
        self.index.clear();
        self.dirty = false;
    }
}

/// Bid/ask price levels for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    bids: SideLevels,
    asks: SideLevels,
    last_update: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: SideLevels::new(BookSide::Bid),
            asks: SideLevels::new(BookSide::Ask),
            last_update: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    fn side(&self, side: BookSide) -> &SideLevels {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: BookSide) -> &mut SideLevels {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Insert or overwrite a level. Quantity ≤ 0 removes it (no-op if absent).
    pub fn upsert_level(&mut self, side: BookSide, price: Decimal, quantity: Decimal) {
        self.side_mut(side).upsert(price, quantity);
    }

    /// Batch upsert, last write wins. Both sides are sorted once at the end.
    pub fn apply_levels(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        timestamp: DateTime<Utc>,
    ) {
        for level in bids {
            self.bids.upsert(level.price, level.quantity);
        }
        for level in asks {
            self.asks.upsert(level.price, level.quantity);
        }
        self.bids.ensure_sorted();
        self.asks.ensure_sorted();
        self.last_update = Some(timestamp);
    }

    /// Clear both sides, then apply.
    pub fn replace(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], timestamp: DateTime<Utc>) {
        self.clear();
        self.apply_levels(bids, asks, timestamp);
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// First `limit` levels of a side in side order (bids descending, asks ascending).
    pub fn sorted_levels(&mut self, side: BookSide, limit: usize) -> &[PriceLevel] {
        self.side_mut(side).sorted(limit)
    }

    pub fn level_count(&self, side: BookSide) -> usize {
        self.side(side).levels.len()
    }

    /// Cumulative quantity at prices ≤ `price` (asks) or ≥ `price` (bids).
    pub fn depth_up_to(&self, side: BookSide, price: Decimal) -> Decimal {
        self.side(side)
            .levels
            .iter()
            .filter(|l| match side {
                BookSide::Ask => l.price <= price,
                BookSide::Bid => l.price >= price,
            })
            .map(|l| l.quantity)
            .sum()
    }

    /// Volume-weighted price to take `quantity` from a side, walking levels in order.
    ///
    /// Returns `(0, false)` when the side cannot absorb the whole quantity.
    pub fn vwap(&mut self, side: BookSide, quantity: Decimal) -> (Decimal, bool) {
        if quantity <= Decimal::ZERO {
            return (Decimal::ZERO, false);
        }
        let levels = self.side_mut(side).sorted(usize::MAX);
        let mut remaining = quantity;
        let mut cost = Decimal::ZERO;
        for level in levels {
            let take = remaining.min(level.quantity);
            cost += take * level.price;
            remaining -= take;
            if remaining.is_zero() {
                break;
            }
        }
        if remaining > Decimal::ZERO {
            return (Decimal::ZERO, false);
        }
        match cost.checked_div(quantity) {
            Some(price) => (price, true),
            None => (Decimal::ZERO, false),
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// `(best_bid + best_ask) / 2`, or zero unless both sides have levels.
    pub fn mid_price(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid.price + ask.price) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }

    /// `best_ask − best_bid`, or zero unless both sides have levels.
    pub fn spread(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price - bid.price,
            _ => Decimal::ZERO,
        }
    }

    /// Sorted immutable copy of the top `depth` levels per side.
    pub fn snapshot(&mut self, depth: usize) -> Depth {
        Depth {
            symbol: self.symbol.clone(),
            timestamp: self.last_update,
            bids: self.bids.sorted(depth).to_vec(),
            asks: self.asks.sorted(depth).to_vec(),
        }
    }
}

/// A sorted, read-only view of a book at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
}

impl Depth {
    pub fn levels(&self, side: BookSide) -> &[PriceLevel] {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
