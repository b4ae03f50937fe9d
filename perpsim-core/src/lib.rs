//! PerpSim Core: deterministic event-driven backtesting for perpetual futures.
//!
//! This crate contains the simulation engine:
//! - Domain types (market data, orders, trades, positions)
//! - Per-symbol order books built from depth updates or klines
//! - A priority event scheduler with stable tie-breaking
//! - Order matching with pluggable slippage, fee and latency models
//! - Cross and isolated margin accounting with funding and liquidation
//! - Performance statistics over the equity curve
//! - The fixed-tick backtest driver and the `Strategy` interface

pub mod cancel;
pub mod config;
pub mod domain;
pub mod engine;
pub mod feed;
pub mod rng;
pub mod strategy;
