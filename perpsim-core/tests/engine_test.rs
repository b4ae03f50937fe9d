//! Integration tests for the backtest driver.
//!
//! Tests:
//! 1. Fills and accounting through the full loop
//! 2. Funding settlement and liquidation
//! 3. Strategy callbacks and error propagation
//! 4. Determinism and cancellation

use chrono::{DateTime, Duration, TimeZone, Utc};
use perpsim_core::cancel::CancellationToken;
use perpsim_core::config::{BacktestConfig, FeeConfig, LatencyConfig, SlippageConfig};
use perpsim_core::domain::{
    FundingRate, Kline, LiquidationEvent, MarketDataPoint, MarketPayload, OrderEvent,
    OrderRequest, OrderSide, OrderStatus, Trade,
};
use perpsim_core::engine::{run_backtest, BacktestDriver, BacktestError, RunStatus};
use perpsim_core::feed::{DataFeed, InMemoryFeed};
use perpsim_core::strategy::{
    BuyAndHold, HoldStrategy, Strategy, StrategyContext, StrategyError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const SYMBOL: &str = "BTCUSDT";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn minute(n: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(n)
}

fn kline(ts: DateTime<Utc>, low: Decimal, high: Decimal, close: Decimal) -> MarketDataPoint {
    MarketDataPoint::new(
        SYMBOL,
        ts,
        MarketPayload::Kline(Kline {
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
        }),
    )
}

fn funding(ts: DateTime<Utc>, rate: Decimal) -> MarketDataPoint {
    MarketDataPoint::new(
        SYMBOL,
        ts,
        MarketPayload::Funding(FundingRate {
            rate,
            next_funding_time: None,
        }),
    )
}

/// Flat klines at `price` (ask at `price`, bid one below) for minutes 0..n.
fn flat_klines(n: i64, price: Decimal) -> Vec<MarketDataPoint> {
    (0..n)
        .map(|i| kline(minute(i), price - dec!(1), price, price))
        .collect()
}

fn config(minutes: i64, capital: Decimal) -> BacktestConfig {
    BacktestConfig::new(minute(0), minute(minutes), vec![SYMBOL.to_string()], capital)
}

// ──────────────────────────────────────────────
// Fills and accounting
// ──────────────────────────────────────────────

#[test]
fn market_buy_fills_at_ask_with_zero_costs() {
    let config = config(2, dec!(10000));
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut strategy = BuyAndHold::new(dec!(1));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.ticks_processed, 3);
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.price, dec!(100));
    assert_eq!(trade.quantity, dec!(1));
    assert_eq!(trade.fee, Decimal::ZERO);

    assert_eq!(result.final_positions.len(), 1);
    let position = &result.final_positions[0];
    assert_eq!(position.long_quantity, dec!(1));
    assert_eq!(position.entry_price, dec!(100));
    assert_eq!(result.final_value, dec!(10000));
    assert_eq!(result.pnl, Decimal::ZERO);
    assert_eq!(result.equity_curve.len(), 3);
    assert!(result.equity_curve.iter().all(|p| p.equity == dec!(10000)));
}

#[test]
fn slippage_and_fees_flow_into_balance() {
    let mut config = config(1, dec!(10000));
    config.slippage = SlippageConfig::FixedBps { bps: dec!(10) };
    config.fees = FeeConfig {
        maker_rate: dec!(0.0002),
        taker_rate: dec!(0.0004),
    };
    let mut feed = InMemoryFeed::new(flat_klines(2, dec!(100)));
    let mut strategy = BuyAndHold::new(dec!(1));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    let trade = &result.trades[0];
    assert_eq!(trade.price, dec!(100.1));
    assert_eq!(trade.fee, dec!(0.04004));
    // Mark stays at 100, so the slippage shows up as unrealized loss.
    assert_eq!(result.final_value, dec!(10000) - dec!(0.04004) - dec!(0.1));
    assert_eq!(result.stats.trade_count, 1);
    assert!((result.stats.total_fees - 0.04004).abs() < 1e-10);
}

#[test]
fn insufficient_margin_rejects_order_and_run_continues() {
    // 20 × 100 × 1% = 20 required against 10 of equity.
    let config = config(2, dec!(10));
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut strategy = BuyAndHold::new(dec!(20));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.trades.is_empty());
    assert_eq!(result.rejected_orders, 1);
    assert!(result.final_positions.is_empty());
    assert_eq!(result.final_value, dec!(10));
}

#[test]
fn malformed_and_foreign_points_are_skipped() {
    let config = config(1, dec!(10000));
    let mut points = flat_klines(2, dec!(100));
    points.push(kline(minute(0), dec!(-5), dec!(100), dec!(100)));
    points.push(MarketDataPoint::new(
        "ETHUSDT",
        minute(0),
        MarketPayload::Kline(Kline {
            open: dec!(2000),
            high: dec!(2000),
            low: dec!(1999),
            close: dec!(2000),
            volume: dec!(1),
        }),
    ));
    let mut feed = InMemoryFeed::new(points);
    let mut recorder = Recorder::default();

    let result = run_backtest(&config, &mut feed, &mut recorder, None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(recorder.ticks, 2);
    assert!(recorder.symbols_seen.iter().all(|s| s == SYMBOL));
}

#[test]
fn points_before_start_are_ignored() {
    let config = config(1, dec!(10000));
    let mut points = flat_klines(2, dec!(100));
    points.push(kline(t0() - Duration::minutes(5), dec!(1), dec!(2), dec!(2)));
    let mut feed = InMemoryFeed::new(points);
    let mut recorder = Recorder::default();

    run_backtest(&config, &mut feed, &mut recorder, None).unwrap();

    assert_eq!(recorder.ticks, 2);
}

#[test]
fn data_gap_is_a_no_op_tick() {
    let config = config(4, dec!(10000));
    let mut feed = InMemoryFeed::new(vec![
        kline(minute(0), dec!(99), dec!(100), dec!(100)),
        kline(minute(4), dec!(99), dec!(100), dec!(100)),
    ]);

    let result = run_backtest(&config, &mut feed, &mut HoldStrategy, None).unwrap();

    assert_eq!(result.ticks_processed, 5);
    assert_eq!(result.equity_curve.len(), 5);
    assert!(result.drawdown_curve.iter().all(|d| d.drawdown == 0.0));
}

// ──────────────────────────────────────────────
// Funding and liquidation
// ──────────────────────────────────────────────

#[test]
fn funding_is_paid_by_longs() {
    let config = config(2, dec!(10000));
    let mut points = flat_klines(3, dec!(100));
    points.push(funding(minute(1), dec!(0.001)));
    let mut feed = InMemoryFeed::new(points);
    let mut strategy = BuyAndHold::new(dec!(1));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    // 1 × 100 × 0.001
    assert_eq!(result.final_value, dec!(9999.9));
    assert_eq!(result.equity_curve[0].equity, dec!(10000));
    assert_eq!(result.equity_curve[1].equity, dec!(9999.9));
}

#[test]
fn funding_is_ignored_when_not_requested() {
    let mut config = config(2, dec!(10000));
    config.data_types = vec![perpsim_core::domain::DataKind::Kline];
    let mut points = flat_klines(3, dec!(100));
    points.push(funding(minute(1), dec!(0.001)));
    let mut feed = InMemoryFeed::new(points);
    let mut strategy = BuyAndHold::new(dec!(1));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    assert_eq!(result.final_value, dec!(10000));
}

#[test]
fn cross_position_is_liquidated_below_maintenance() {
    // 10 @ 100 on 100 of capital; maintenance ratio 0.5 × 1% = 0.005.
    // At 90.4: equity 4, notional 904, ratio ≈ 0.0044.
    let config = config(2, dec!(100));
    let mut feed = InMemoryFeed::new(vec![
        kline(minute(0), dec!(99), dec!(100), dec!(100)),
        kline(minute(1), dec!(90), dec!(91), dec!(90.4)),
        kline(minute(2), dec!(90), dec!(91), dec!(90.4)),
    ]);
    let mut recorder = Recorder {
        buy_quantity: Some(dec!(10)),
        ..Recorder::default()
    };

    let result = run_backtest(&config, &mut feed, &mut recorder, None).unwrap();

    assert_eq!(result.liquidations.len(), 1);
    let liquidation = &result.liquidations[0];
    assert_eq!(liquidation.timestamp, minute(1));
    assert_eq!(liquidation.quantity, dec!(10));
    assert_eq!(liquidation.realized_pnl, dec!(-96));
    assert!(result.final_positions.is_empty());
    assert_eq!(result.final_value, dec!(4));
    assert_eq!(recorder.liquidations.len(), 1);
    assert_eq!(result.stats.trade_count, 1);
    assert_eq!(result.stats.closing_trade_count, 1);
    assert_eq!(result.stats.win_rate, 0.0);
}

#[test]
fn cross_position_survives_above_maintenance() {
    // At 90.5: equity 5, notional 905, ratio ≈ 0.0055.
    let config = config(1, dec!(100));
    let mut feed = InMemoryFeed::new(vec![
        kline(minute(0), dec!(99), dec!(100), dec!(100)),
        kline(minute(1), dec!(90), dec!(91), dec!(90.5)),
    ]);
    let mut strategy = BuyAndHold::new(dec!(10));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    assert!(result.liquidations.is_empty());
    assert_eq!(result.final_value, dec!(5));
    assert!(result.stats.max_drawdown > 0.9);
}

// ──────────────────────────────────────────────
// Strategy callbacks
// ──────────────────────────────────────────────

/// Records every callback; optionally buys once on the first tick.
#[derive(Default)]
struct Recorder {
    buy_quantity: Option<Decimal>,
    initialized: bool,
    stopped: bool,
    ticks: usize,
    symbols_seen: Vec<String>,
    trades: Vec<Trade>,
    order_events: Vec<OrderEvent>,
    liquidations: Vec<LiquidationEvent>,
}

impl Strategy for Recorder {
    fn initialize(&mut self, _config: &BacktestConfig) -> Result<(), StrategyError> {
        self.initialized = true;
        Ok(())
    }

    fn on_tick(
        &mut self,
        point: &MarketDataPoint,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        self.ticks += 1;
        self.symbols_seen.push(point.symbol.clone());
        if let Some(qty) = self.buy_quantity.take() {
            ctx.place_order(OrderRequest::market(SYMBOL, OrderSide::Buy, qty))?;
        }
        Ok(())
    }

    fn on_trade(
        &mut self,
        trade: &Trade,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        self.trades.push(trade.clone());
        Ok(())
    }

    fn on_order_event(
        &mut self,
        event: &OrderEvent,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        self.order_events.push(event.clone());
        Ok(())
    }

    fn on_liquidation(
        &mut self,
        event: &LiquidationEvent,
        _ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        self.liquidations.push(event.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StrategyError> {
        self.stopped = true;
        Ok(())
    }
}

#[test]
fn fills_and_order_updates_arrive_on_the_next_tick() {
    let config = config(2, dec!(10000));
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut recorder = Recorder {
        buy_quantity: Some(dec!(1)),
        ..Recorder::default()
    };

    let result = run_backtest(&config, &mut feed, &mut recorder, None).unwrap();

    assert!(recorder.initialized);
    assert!(recorder.stopped);
    assert_eq!(recorder.ticks, 3);
    assert_eq!(recorder.trades, result.trades);
    assert_eq!(recorder.trades[0].timestamp, minute(0));

    let statuses: Vec<OrderStatus> = recorder.order_events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![OrderStatus::New, OrderStatus::Filled]);
    assert_eq!(recorder.order_events[1].filled_quantity, dec!(1));
}

#[test]
fn unknown_symbol_order_fails_the_strategy() {
    struct WrongSymbol;
    impl Strategy for WrongSymbol {
        fn on_tick(
            &mut self,
            _point: &MarketDataPoint,
            ctx: &mut StrategyContext<'_>,
        ) -> Result<(), StrategyError> {
            ctx.place_order(OrderRequest::market("DOGEUSDT", OrderSide::Buy, dec!(1)))?;
            Ok(())
        }
    }

    let config = config(1, dec!(10000));
    let mut feed = InMemoryFeed::new(flat_klines(2, dec!(100)));
    let err = run_backtest(&config, &mut feed, &mut WrongSymbol, None).unwrap_err();

    assert!(matches!(err, BacktestError::Strategy(StrategyError::Order(_))));
}

#[test]
fn strategy_error_terminates_the_run() {
    struct FailsOnSecondTick(usize);
    impl Strategy for FailsOnSecondTick {
        fn on_tick(
            &mut self,
            _point: &MarketDataPoint,
            _ctx: &mut StrategyContext<'_>,
        ) -> Result<(), StrategyError> {
            self.0 += 1;
            if self.0 == 2 {
                return Err(StrategyError::Failed("boom".into()));
            }
            Ok(())
        }
    }

    let config = config(5, dec!(10000));
    let mut feed = InMemoryFeed::new(flat_klines(6, dec!(100)));
    let mut strategy = FailsOnSecondTick(0);
    let err = run_backtest(&config, &mut feed, &mut strategy, None).unwrap_err();

    assert!(err.to_string().contains("boom"));
    assert_eq!(strategy.0, 2);
}

#[test]
fn invalid_config_never_starts() {
    let mut config = config(1, dec!(10000));
    config.end_time = config.start_time;
    assert!(matches!(
        BacktestDriver::new(config),
        Err(BacktestError::Config(_))
    ));

    let mut config = self::config(1, dec!(10000));
    config.symbols.clear();
    let mut recorder = Recorder::default();
    let mut feed = InMemoryFeed::new(Vec::new());
    assert!(run_backtest(&config, &mut feed, &mut recorder, None).is_err());
    assert!(!recorder.initialized);
}

#[test]
fn clock_overflowing_intervals_fail_before_the_run() {
    let mut config = config(2, dec!(10000));
    config.tick_interval_secs = 10_000_000_000_000;
    assert!(matches!(
        BacktestDriver::new(config.clone()),
        Err(BacktestError::Config(_))
    ));

    config.tick_interval_secs = u64::MAX;
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut strategy = HoldStrategy;
    let err = run_backtest(&config, &mut feed, &mut strategy, None).unwrap_err();
    assert!(matches!(err, BacktestError::Config(_)));
}

#[test]
fn oversized_latency_fails_before_the_run() {
    let mut config = config(2, dec!(10000));
    config.latency = LatencyConfig::Fixed {
        mean_ms: 10_000_000_000_000_000,
    };
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut strategy = BuyAndHold::new(dec!(1));

    let err = run_backtest(&config, &mut feed, &mut strategy, None).unwrap_err();

    assert!(matches!(err, BacktestError::Config(_)));
}

#[test]
fn interval_longer_than_the_window_runs_one_tick() {
    let mut config = config(2, dec!(10000));
    config.tick_interval_secs = 1_000_000_000;
    let mut feed = InMemoryFeed::new(flat_klines(3, dec!(100)));
    let mut strategy = BuyAndHold::new(dec!(1));

    let result = run_backtest(&config, &mut feed, &mut strategy, None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.ticks_processed, 1);
}

#[test]
fn buy_and_hold_rejects_non_positive_quantity() {
    let config = config(1, dec!(10000));
    let mut feed = InMemoryFeed::new(flat_klines(2, dec!(100)));
    let mut strategy = BuyAndHold::new(Decimal::ZERO);

    let err = run_backtest(&config, &mut feed, &mut strategy, None).unwrap_err();

    assert!(matches!(err, BacktestError::Strategy(StrategyError::Failed(_))));
}

// ──────────────────────────────────────────────
// Determinism and cancellation
// ──────────────────────────────────────────────

/// Flips between long and flat every time it has no open orders.
struct Toggle;

impl Strategy for Toggle {
    fn on_tick(
        &mut self,
        point: &MarketDataPoint,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<(), StrategyError> {
        if ctx.open_orders().next().is_some() {
            return Ok(());
        }
        let side = match ctx.position(&point.symbol) {
            Some(p) if p.is_long() => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        ctx.place_order(OrderRequest::market(point.symbol.clone(), side, dec!(1)))?;
        Ok(())
    }
}

fn wavy_klines(n: i64) -> Vec<MarketDataPoint> {
    (0..n)
        .map(|i| {
            let close = dec!(100) + Decimal::from((i * 7) % 11) - dec!(5);
            kline(minute(i), close - dec!(0.5), close + dec!(0.5), close)
        })
        .collect()
}

fn noisy_config() -> BacktestConfig {
    let mut config = config(59, dec!(10000));
    config.slippage = SlippageConfig::FixedBps { bps: dec!(2) };
    config.fees = FeeConfig {
        maker_rate: dec!(0.0002),
        taker_rate: dec!(0.0004),
    };
    config.latency = LatencyConfig::Normal {
        mean_ms: 30_000,
        std_dev_ms: 20_000,
    };
    config.seed = 7;
    config
}

#[test]
fn identical_runs_produce_identical_results() {
    let config = noisy_config();
    let points = wavy_klines(60);

    let a =
        run_backtest(&config, &mut InMemoryFeed::new(points.clone()), &mut Toggle, None).unwrap();
    let b = run_backtest(&config, &mut InMemoryFeed::new(points), &mut Toggle, None).unwrap();

    assert!(!a.trades.is_empty());
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.equity_curve, b.equity_curve);
    assert_eq!(a.drawdown_curve, b.drawdown_curve);
    assert_eq!(a.final_value, b.final_value);
}

#[test]
fn different_seeds_change_the_fingerprint() {
    let a = noisy_config();
    let mut b = noisy_config();
    b.seed = 8;
    assert_ne!(a.fingerprint(), b.fingerprint());
}

#[test]
fn driver_can_rerun_after_feed_reset() {
    let driver = BacktestDriver::new(noisy_config()).unwrap();
    let mut feed = InMemoryFeed::new(wavy_klines(60));

    let first = driver.run(&mut feed, &mut Toggle, None).unwrap();
    feed.reset().unwrap();
    let second = driver.run(&mut feed, &mut Toggle, None).unwrap();

    assert_eq!(first.trades, second.trades);
    assert_eq!(first.equity_curve, second.equity_curve);
}

#[test]
fn cancellation_before_first_tick_returns_empty_partial_result() {
    let config = config(10, dec!(10000));
    let token = CancellationToken::new();
    token.cancel();
    let mut recorder = Recorder::default();
    let mut feed = InMemoryFeed::new(flat_klines(11, dec!(100)));

    let result = run_backtest(&config, &mut feed, &mut recorder, Some(&token)).unwrap();

    assert!(result.is_cancelled());
    assert_eq!(result.ticks_processed, 0);
    assert!(result.equity_curve.is_empty());
    assert!(result.trades.is_empty());
    assert_eq!(result.final_value, dec!(10000));
    assert_eq!(result.stats.trade_count, 0);
    assert!(recorder.stopped);
}

#[test]
fn cancellation_mid_run_keeps_completed_ticks() {
    /// Cancels its own run on the third tick.
    struct CancelOnThird {
        token: CancellationToken,
        ticks: usize,
    }
    impl Strategy for CancelOnThird {
        fn on_tick(
            &mut self,
            _point: &MarketDataPoint,
            _ctx: &mut StrategyContext<'_>,
        ) -> Result<(), StrategyError> {
            self.ticks += 1;
            if self.ticks == 3 {
                self.token.cancel();
            }
            Ok(())
        }
    }

    let config = config(10, dec!(10000));
    let token = CancellationToken::new();
    let mut strategy = CancelOnThird {
        token: token.clone(),
        ticks: 0,
    };
    let mut feed = InMemoryFeed::new(flat_klines(11, dec!(100)));

    let result = run_backtest(&config, &mut feed, &mut strategy, Some(&token)).unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.ticks_processed, 3);
    assert_eq!(result.equity_curve.len(), 3);
    assert!(feed.has_next());
}
