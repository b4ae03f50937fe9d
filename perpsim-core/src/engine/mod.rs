//! Backtesting engine: event loop and supporting infrastructure.
//!
//! The driver pulls time-ordered market data from a feed, advances a fixed
//! tick clock, and per tick:
//!
//! 1. Dispatches due events (market data, fills, order updates, funding)
//! 2. Matches resting orders against the current order book
//! 3. Settles funding and checks for liquidation
//! 4. Marks positions to market and records equity

pub mod accounting;
pub mod event;
pub mod execution;
pub mod loop_runner;
pub mod order_book;
pub mod scheduler;
pub mod state;
pub mod stats;

pub use accounting::{Account, FillOutcome, PositionError, PositionManager, PriceMap};
pub use event::{Event, EventPayload};
pub use execution::{CostModels, OrderError, OrderMatchingEngine};
pub use loop_runner::{run_backtest, BacktestDriver, BacktestError};
pub use order_book::{BookSide, Depth, OrderBook};
pub use scheduler::{EventScheduler, MinHeap};
pub use state::{BacktestResult, DrawdownPoint, EquityPoint, RunStatus};
pub use stats::{PerformanceStats, StatsEngine};
