//! Performance statistics.
//!
//! `StatsEngine` ingests `(timestamp, equity)` samples, committed trades and
//! liquidations while the run is in progress and produces a `PerformanceStats` snapshot at
//! the end. Accounting stays in `Decimal`; statistics are `f64`.
//! Every ratio whose denominator is zero evaluates to 0.

use crate::domain::{LiquidationEvent, Trade};
use crate::engine::accounting::FillOutcome;
use crate::engine::state::{DrawdownPoint, EquityPoint};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Final statistics of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return: f64,
    pub annual_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Fraction of closing trades with positive PnL net of fees.
    /// Liquidations count as losing closes.
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_return: f64,
    pub avg_holding_time_secs: f64,
    pub trade_count: usize,
    /// Closing fills plus liquidations.
    pub closing_trade_count: usize,
    pub total_fees: f64,
    pub final_equity: f64,
}

/// A committed trade as the statistics see it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TradeSample {
    timestamp: DateTime<Utc>,
    price: f64,
    fee: f64,
    closed: f64,
    realized_pnl: f64,
}

impl TradeSample {
    fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.fee
    }

    fn is_closing(&self) -> bool {
        self.closed > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct StatsEngine {
    initial_capital: Decimal,
    annualization: f64,
    high_water_mark: f64,
    equity: Vec<f64>,
    returns: Vec<f64>,
    equity_curve: Vec<EquityPoint>,
    drawdown_curve: Vec<DrawdownPoint>,
    trades: Vec<TradeSample>,
    liquidations: Vec<TradeSample>,
}

impl StatsEngine {
    pub fn new(initial_capital: Decimal, annualization: f64) -> Self {
        Self {
            initial_capital,
            annualization,
            high_water_mark: 0.0,
            equity: Vec::new(),
            returns: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            trades: Vec::new(),
            liquidations: Vec::new(),
        }
    }

    /// Record one equity sample. Drawdown is measured from the running peak.
    pub fn update(&mut self, timestamp: DateTime<Utc>, equity: Decimal) {
        let value = to_f64(equity);
        if let Some(&prev) = self.equity.last() {
            self.returns.push(if prev != 0.0 { (value - prev) / prev } else { 0.0 });
        }
        if self.equity.is_empty() || value > self.high_water_mark {
            self.high_water_mark = value;
        }
        self.equity.push(value);

        let drawdown = if self.high_water_mark > 0.0 {
            ((self.high_water_mark - value) / self.high_water_mark).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let start = self
            .equity_curve
            .first()
            .map(|p| p.timestamp)
            .unwrap_or(timestamp);

        self.equity_curve.push(EquityPoint {
            timestamp,
            equity,
            pnl: equity - self.initial_capital,
        });
        self.drawdown_curve.push(DrawdownPoint {
            timestamp,
            drawdown,
            duration_secs: (timestamp - start).num_seconds(),
        });
    }

    pub fn record_trade(&mut self, trade: &Trade, outcome: &FillOutcome) {
        self.trades.push(TradeSample {
            timestamp: trade.timestamp,
            price: to_f64(trade.price),
            fee: to_f64(trade.fee),
            closed: to_f64(outcome.closed),
            realized_pnl: to_f64(outcome.realized_pnl),
        });
    }

    /// A forced close settles like a fee-free closing fill.
    pub fn record_liquidation(&mut self, event: &LiquidationEvent) {
        self.liquidations.push(TradeSample {
            timestamp: event.timestamp,
            price: to_f64(event.price),
            fee: 0.0,
            closed: to_f64(event.quantity.abs()),
            realized_pnl: to_f64(event.realized_pnl),
        });
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn drawdown_curve(&self) -> &[DrawdownPoint] {
        &self.drawdown_curve
    }

    pub fn compute(&self) -> PerformanceStats {
        let closing: Vec<&TradeSample> = self
            .trades
            .iter()
            .filter(|t| t.is_closing())
            .chain(&self.liquidations)
            .collect();
        let first_ts = self.equity_curve.first().map(|p| p.timestamp);
        let last_ts = self.equity_curve.last().map(|p| p.timestamp);
        let years = match (first_ts, last_ts) {
            (Some(a), Some(b)) => (b - a).num_seconds() as f64 / SECONDS_PER_YEAR,
            _ => 0.0,
        };
        let total = total_return(&self.equity);

        PerformanceStats {
            total_return: total,
            annual_return: annualized_return(total, years),
            sharpe_ratio: sharpe_ratio(&self.returns, self.annualization),
            max_drawdown: self
                .drawdown_curve
                .iter()
                .map(|d| d.drawdown)
                .fold(0.0, f64::max),
            win_rate: win_rate(&closing),
            profit_factor: profit_factor(&closing),
            avg_trade_return: avg_trade_return(&closing),
            avg_holding_time_secs: avg_holding_time_secs(&self.trades),
            trade_count: self.trades.len(),
            closing_trade_count: closing.len(),
            total_fees: self.trades.iter().map(|t| t.fee).sum(),
            final_equity: self
                .equity
                .last()
                .copied()
                .unwrap_or_else(|| to_f64(self.initial_capital)),
        }
    }
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

// ─── Individual metric functions ────────────────────────────────────

/// `(last − first) / first`
pub fn total_return(equity: &[f64]) -> f64 {
    match (equity.first(), equity.last()) {
        (Some(&first), Some(&last)) if equity.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// `(1 + r)^(1/years) − 1`. Zero span gives 0; total loss gives −1.
pub fn annualized_return(total_return: f64, years: f64) -> f64 {
    if years <= 0.0 {
        return 0.0;
    }
    let base = 1.0 + total_return;
    if base <= 0.0 {
        return -1.0;
    }
    let annual = base.powf(1.0 / years) - 1.0;
    if annual.is_finite() {
        annual
    } else {
        0.0
    }
}

pub fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// `mean / stddev × sqrt(annualization)` over per-step returns.
pub fn sharpe_ratio(returns: &[f64], annualization: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(returns) / std * annualization.sqrt()
}

fn win_rate(closing: &[&TradeSample]) -> f64 {
    if closing.is_empty() {
        return 0.0;
    }
    let wins = closing.iter().filter(|t| t.net_pnl() > 0.0).count();
    wins as f64 / closing.len() as f64
}

/// Gross profit over gross loss; 0 when there are no losses.
fn profit_factor(closing: &[&TradeSample]) -> f64 {
    let (profit, loss) = closing.iter().fold((0.0, 0.0), |(p, l), t| {
        let net = t.net_pnl();
        if net > 0.0 {
            (p + net, l)
        } else {
            (p, l - net)
        }
    });
    if loss <= 0.0 {
        return 0.0;
    }
    profit / loss
}

/// Mean of net PnL over closed notional.
fn avg_trade_return(closing: &[&TradeSample]) -> f64 {
    let returns: Vec<f64> = closing
        .iter()
        .filter(|t| t.price * t.closed > 0.0)
        .map(|t| t.net_pnl() / (t.price * t.closed))
        .collect();
    mean_f64(&returns)
}

fn avg_holding_time_secs(trades: &[TradeSample]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let gaps: Vec<f64> = trades
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1_000.0)
        .collect();
    mean_f64(&gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide, TradeId};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn t(days: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(days)
    }

    fn trade_at(ts: DateTime<Utc>, fee: Decimal) -> Trade {
        Trade {
            id: TradeId(1),
            order_id: OrderId(1),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Sell,
            price: dec!(100),
            quantity: dec!(1),
            fee,
            timestamp: ts,
        }
    }

    fn closing(pnl: Decimal) -> FillOutcome {
        FillOutcome {
            opened: Decimal::ZERO,
            closed: dec!(1),
            realized_pnl: pnl,
        }
    }

    #[test]
    fn drawdown_sequence() {
        let mut stats = StatsEngine::new(dec!(10000), 252.0);
        stats.update(t(0), dec!(10000));
        stats.update(t(1), dec!(9000));
        stats.update(t(2), dec!(9500));
        let dd: Vec<f64> = stats.drawdown_curve().iter().map(|d| d.drawdown).collect();
        assert!((dd[0] - 0.0).abs() < 1e-10);
        assert!((dd[1] - 0.10).abs() < 1e-10);
        assert!((dd[2] - 0.05).abs() < 1e-10);
        assert_eq!(stats.drawdown_curve()[2].duration_secs, 2 * 86_400);
        assert!((stats.compute().max_drawdown - 0.10).abs() < 1e-10);
    }

    #[test]
    fn equity_points_carry_pnl() {
        let mut stats = StatsEngine::new(dec!(10000), 252.0);
        stats.update(t(0), dec!(10250));
        assert_eq!(stats.equity_curve()[0].pnl, dec!(250));
    }

    #[test]
    fn total_and_annual_return() {
        let mut stats = StatsEngine::new(dec!(100), 252.0);
        stats.update(t(0), dec!(100));
        stats.update(t(365), dec!(110));
        let s = stats.compute();
        assert!((s.total_return - 0.10).abs() < 1e-10);
        assert!((s.annual_return - 0.10).abs() < 1e-10);
        assert!((s.final_equity - 110.0).abs() < 1e-10);
    }

    #[test]
    fn empty_engine_is_all_zero() {
        let s = StatsEngine::new(dec!(1000), 252.0).compute();
        assert_eq!(s.total_return, 0.0);
        assert_eq!(s.sharpe_ratio, 0.0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.avg_holding_time_secs, 0.0);
        assert!((s.final_equity - 1000.0).abs() < 1e-10);
    }

    #[test]
    fn sharpe_uses_sample_std_and_annualization() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let expected = mean_f64(&returns) / std_dev(&returns) * 252.0_f64.sqrt();
        assert!((sharpe_ratio(&returns, 252.0) - expected).abs() < 1e-12);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 252.0), 0.0);
        assert!((std_dev(&[1.0, 3.0]) - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn trade_statistics_use_closing_trades() {
        let mut stats = StatsEngine::new(dec!(10000), 252.0);
        // An opening fill: ignored by win rate and profit factor.
        stats.record_trade(
            &trade_at(t(0), dec!(1)),
            &FillOutcome {
                opened: dec!(1),
                ..FillOutcome::default()
            },
        );
        stats.record_trade(&trade_at(t(1), dec!(1)), &closing(dec!(11)));
        stats.record_trade(&trade_at(t(2), dec!(1)), &closing(dec!(-4)));
        stats.record_trade(&trade_at(t(4), dec!(1)), &closing(dec!(1)));

        let s = stats.compute();
        assert_eq!(s.trade_count, 4);
        assert_eq!(s.closing_trade_count, 3);
        // nets: 10, -5, 0 → one win of three
        assert!((s.win_rate - 1.0 / 3.0).abs() < 1e-10);
        assert!((s.profit_factor - 2.0).abs() < 1e-10);
        assert!((s.avg_trade_return - (0.10 - 0.05 + 0.0) / 3.0).abs() < 1e-10);
        // gaps 1, 1, 2 days
        assert!((s.avg_holding_time_secs - 4.0 / 3.0 * 86_400.0).abs() < 1e-6);
        assert!((s.total_fees - 4.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_zero_without_losses() {
        let mut stats = StatsEngine::new(dec!(10000), 252.0);
        stats.record_trade(&trade_at(t(0), Decimal::ZERO), &closing(dec!(5)));
        assert_eq!(stats.compute().profit_factor, 0.0);
        assert!((stats.compute().win_rate - 1.0).abs() < 1e-10);
    }

    #[test]
    fn liquidations_count_as_losing_closes() {
        let mut stats = StatsEngine::new(dec!(10000), 252.0);
        stats.record_trade(&trade_at(t(0), Decimal::ZERO), &closing(dec!(5)));
        stats.record_liquidation(&LiquidationEvent {
            symbol: "BTCUSDT".into(),
            timestamp: t(1),
            price: dec!(90),
            quantity: dec!(-2),
            realized_pnl: dec!(-20),
        });

        let s = stats.compute();
        assert_eq!(s.trade_count, 1);
        assert_eq!(s.closing_trade_count, 2);
        assert!((s.win_rate - 0.5).abs() < 1e-10);
        assert!((s.profit_factor - 0.25).abs() < 1e-10);
        assert!((s.total_fees - 0.0).abs() < 1e-10);
    }

    #[test]
    fn annualized_guards() {
        assert_eq!(annualized_return(0.5, 0.0), 0.0);
        assert_eq!(annualized_return(-1.5, 1.0), -1.0);
    }
}
