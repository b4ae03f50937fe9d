//! Run result types.

use crate::domain::{LiquidationEvent, Position, Trade};
use crate::engine::stats::PerformanceStats;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    /// Equity minus initial capital.
    pub pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub timestamp: DateTime<Utc>,
    /// Fractional decline from the running peak, in [0, 1].
    pub drawdown: f64,
    /// Seconds since the first equity point of the run.
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped by a cancellation token; curves cover the ticks that ran.
    Cancelled,
}

/// Output of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub status: RunStatus,
    pub fingerprint: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub ticks_processed: u64,

    pub initial_value: Decimal,
    pub final_value: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: f64,

    pub stats: PerformanceStats,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub trades: Vec<Trade>,
    pub liquidations: Vec<LiquidationEvent>,
    pub rejected_orders: usize,
    pub final_positions: Vec<Position>,
}

impl BacktestResult {
    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }
}
