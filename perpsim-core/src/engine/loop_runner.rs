//! Fixed-step event loop driving a backtest.
//!
//! Each tick at time `now`:
//! 1. Schedule feed points with timestamp ≤ now, then drain the scheduler
//! 2. Market data updates books and mark prices, then reaches `Strategy::on_tick`;
//!    trade and order notifications from the previous tick are delivered
//! 3. Match resting orders against each symbol's book snapshot
//! 4. Settle funding due now, then run the liquidation check
//! 5. Mark to market and record equity
//!
//! The loop is single-threaded and performs no I/O. Given the same
//! configuration, feed and strategy it produces the same result.

use crate::cancel::CancellationToken;
use crate::config::{BacktestConfig, ConfigError};
use crate::domain::{LiquidationEvent, MarketDataPoint, MarketPayload, PriceLevel, Trade};
use crate::engine::accounting::{PositionManager, PriceMap};
use crate::engine::event::{Event, EventPayload};
use crate::engine::execution::{CostModels, OrderMatchingEngine};
use crate::engine::order_book::OrderBook;
use crate::engine::scheduler::EventScheduler;
use crate::engine::state::{BacktestResult, RunStatus};
use crate::engine::stats::{to_f64, StatsEngine};
use crate::feed::{DataFeed, FeedError};
use crate::strategy::{Strategy, StrategyContext, StrategyError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
}

/// Runs backtests for one validated configuration.
#[derive(Debug, Clone)]
pub struct BacktestDriver {
    config: BacktestConfig,
}

impl BacktestDriver {
    /// Validate the configuration up front; a bad config never starts a run.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay `feed` through `strategy`.
    ///
    /// Cancellation is checked once per tick; a cancelled run returns the
    /// partial result with `RunStatus::Cancelled`.
    pub fn run(
        &self,
        feed: &mut dyn DataFeed,
        strategy: &mut dyn Strategy,
        cancel: Option<&CancellationToken>,
    ) -> Result<BacktestResult, BacktestError> {
        let config = &self.config;
        let fingerprint = config.fingerprint();
        info!(
            fingerprint = %&fingerprint[..12],
            symbols = ?config.symbols,
            start = %config.start_time,
            end = %config.end_time,
            "backtest started"
        );

        strategy.initialize(config)?;
        let mut state = RunState::new(config);
        let interval = config.tick_interval();
        let mut now = config.start_time;
        let mut ticks: u64 = 0;
        let mut status = RunStatus::Completed;

        while now <= config.end_time {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(%now, ticks, "backtest cancelled");
                status = RunStatus::Cancelled;
                break;
            }
            state.tick(feed, strategy, now)?;
            ticks += 1;
            match now.checked_add_signed(interval) {
                Some(next) => now = next,
                None => break,
            }
        }

        strategy.stop()?;
        let result = state.finish(status, ticks, fingerprint);
        info!(
            status = ?result.status,
            ticks = result.ticks_processed,
            trades = result.trades.len(),
            final_value = %result.final_value,
            "backtest finished"
        );
        Ok(result)
    }
}

/// Validate `config` and run once.
pub fn run_backtest(
    config: &BacktestConfig,
    feed: &mut dyn DataFeed,
    strategy: &mut dyn Strategy,
    cancel: Option<&CancellationToken>,
) -> Result<BacktestResult, BacktestError> {
    BacktestDriver::new(config.clone())?.run(feed, strategy, cancel)
}

/// Everything a single run owns. Nothing here outlives the run.
struct RunState<'c> {
    config: &'c BacktestConfig,
    books: BTreeMap<String, OrderBook>,
    marks: PriceMap,
    scheduler: EventScheduler,
    matching: OrderMatchingEngine,
    positions: PositionManager,
    stats: StatsEngine,
    trades: Vec<Trade>,
    liquidations: Vec<LiquidationEvent>,
    lookahead: Option<MarketDataPoint>,
    skipped_points: u64,
}

impl<'c> RunState<'c> {
    fn new(config: &'c BacktestConfig) -> Self {
        let books = config
            .symbols
            .iter()
            .map(|s| (s.clone(), OrderBook::new(s.clone())))
            .collect();
        Self {
            config,
            books,
            marks: PriceMap::new(),
            scheduler: EventScheduler::new(),
            matching: OrderMatchingEngine::new(
                CostModels::from_config(config),
                config.market_fill_policy,
            ),
            positions: PositionManager::from_config(config),
            stats: StatsEngine::new(config.initial_capital, config.annualization_factor),
            trades: Vec::new(),
            liquidations: Vec::new(),
            lookahead: None,
            skipped_points: 0,
        }
    }

    fn ctx(&mut self, now: DateTime<Utc>) -> StrategyContext<'_> {
        StrategyContext::new(
            now,
            &self.config.symbols,
            &mut self.matching,
            &self.positions,
            &self.books,
            &self.marks,
        )
    }

    fn tick(
        &mut self,
        feed: &mut dyn DataFeed,
        strategy: &mut dyn Strategy,
        now: DateTime<Utc>,
    ) -> Result<(), BacktestError> {
        self.pull_feed(feed, now)?;

        let mut funding_due: Vec<(String, Decimal)> = Vec::new();
        for event in self.scheduler.drain_up_to(now) {
            match event.payload {
                EventPayload::MarketData(point) => {
                    self.apply_market_data(&point);
                    strategy.on_tick(&point, &mut self.ctx(now))?;
                }
                EventPayload::Trade(trade) => strategy.on_trade(&trade, &mut self.ctx(now))?,
                EventPayload::Order(order_event) => {
                    strategy.on_order_event(&order_event, &mut self.ctx(now))?
                }
                EventPayload::Funding { symbol, rate } => funding_due.push((symbol, rate)),
            }
        }

        self.match_all(now);

        self.positions.mark_to_market(&self.marks);
        for (symbol, rate) in funding_due {
            self.positions.apply_funding(&symbol, rate);
        }

        let liquidated = self.positions.check_liquidation(&self.marks, now);
        for event in &liquidated {
            self.stats.record_liquidation(event);
            strategy.on_liquidation(event, &mut self.ctx(now))?;
        }
        self.liquidations.extend(liquidated);

        self.positions.mark_to_market(&self.marks);
        self.stats.update(now, self.positions.equity());
        Ok(())
    }

    /// Move every feed point with timestamp ≤ `now` into the scheduler.
    fn pull_feed(&mut self, feed: &mut dyn DataFeed, now: DateTime<Utc>) -> Result<(), FeedError> {
        loop {
            let point = match self.lookahead.take() {
                Some(point) => point,
                None if feed.has_next() => match feed.next() {
                    Ok(point) => point,
                    Err(FeedError::Exhausted) => return Ok(()),
                    Err(e) => return Err(e),
                },
                None => return Ok(()),
            };
            if point.timestamp > now {
                self.lookahead = Some(point);
                return Ok(());
            }
            if point.timestamp < self.config.start_time
                || !self.config.wants(point.kind())
                || !self.config.symbols.contains(&point.symbol)
            {
                continue;
            }
            if let Err(reason) = point.validate() {
                warn!(
                    symbol = %point.symbol,
                    timestamp = %point.timestamp,
                    %reason,
                    "skipping malformed data point"
                );
                self.skipped_points += 1;
                continue;
            }

            let event = match &point.payload {
                MarketPayload::Funding(f) => {
                    Event::funding(point.timestamp, point.symbol.clone(), f.rate)
                }
                _ => Event::market_data(point),
            };
            self.scheduler.schedule(event);
        }
    }

    fn apply_market_data(&mut self, point: &MarketDataPoint) {
        let Some(book) = self.books.get_mut(&point.symbol) else {
            return;
        };
        match &point.payload {
            MarketPayload::Kline(k) => {
                let depth = self.config.kline_synthetic_depth;
                book.replace(
                    &[PriceLevel::new(k.low, depth)],
                    &[PriceLevel::new(k.high, depth)],
                    point.timestamp,
                );
                self.marks.insert(point.symbol.clone(), k.close);
            }
            MarketPayload::Depth(update) => {
                book.apply_levels(&update.bids, &update.asks, point.timestamp);
                let mid = book.mid_price();
                if !mid.is_zero() {
                    self.marks.insert(point.symbol.clone(), mid);
                }
            }
            MarketPayload::Trade(print) => {
                self.marks.insert(point.symbol.clone(), print.price);
            }
            MarketPayload::Funding(_) | MarketPayload::OpenInterest(_) => {}
        }
    }

    /// Match every symbol's resting orders, route fills through the account,
    /// and queue trade/order notifications for the next tick.
    fn match_all(&mut self, now: DateTime<Utc>) {
        let config = self.config;
        for symbol in &config.symbols {
            if self.matching.resting_count() == 0 {
                break;
            }
            let Some(book) = self.books.get_mut(symbol) else {
                continue;
            };
            let depth = book.snapshot(usize::MAX);
            if depth.is_empty() {
                continue;
            }

            let positions = &mut self.positions;
            let mut outcomes = Vec::new();
            let trades = self.matching.match_orders(&depth, now, |trade| {
                let outcome = positions.apply_trade(trade)?;
                outcomes.push(outcome);
                Ok(outcome)
            });

            for (trade, outcome) in trades.into_iter().zip(outcomes) {
                self.stats.record_trade(&trade, &outcome);
                self.scheduler.schedule(Event::trade(trade.clone()));
                self.trades.push(trade);
            }
        }

        for order_event in self.matching.drain_events() {
            self.scheduler.schedule(Event::order(order_event));
        }
    }

    fn finish(self, status: RunStatus, ticks: u64, fingerprint: String) -> BacktestResult {
        if self.skipped_points > 0 {
            warn!(skipped = self.skipped_points, "malformed data points were skipped");
        }
        debug!(
            audit_entries = self.matching.audit_trail().len(),
            "order audit trail"
        );

        let initial_value = self.config.initial_capital;
        let final_value = self.positions.equity();
        let pnl = final_value - initial_value;
        let pnl_percent = if initial_value.is_zero() {
            0.0
        } else {
            to_f64(pnl) / to_f64(initial_value) * 100.0
        };

        BacktestResult {
            status,
            fingerprint,
            start_time: self.config.start_time,
            end_time: self.config.end_time,
            ticks_processed: ticks,
            initial_value,
            final_value,
            pnl,
            pnl_percent,
            stats: self.stats.compute(),
            equity_curve: self.stats.equity_curve().to_vec(),
            drawdown_curve: self.stats.drawdown_curve().to_vec(),
            trades: self.trades,
            liquidations: self.liquidations,
            rejected_orders: self.matching.rejected_count(),
            final_positions: self.positions.positions().cloned().collect(),
        }
    }
}
