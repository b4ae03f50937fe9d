//! Backtest configuration and its validation rules.
//!
//! One `BacktestConfig` is built per run and handed to the driver by value.
//! There is no global state: every cost model, margin parameter and clock
//! setting the run uses is read from here.

use crate::domain::{DataKind, MarginMode};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Configuration errors. Fatal before the run starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid config: {field} - {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field,
            message: message.into(),
        }
    }
}

/// Slippage model selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlippageConfig {
    #[default]
    None,
    /// `price × bps / 10000`, added for buys and subtracted for sells.
    FixedBps { bps: Decimal },
}

/// Exchange fee schedule. Simulated fills are charged `taker_rate`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default)]
    pub maker_rate: Decimal,
    #[serde(default)]
    pub taker_rate: Decimal,
}

/// Order latency model selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LatencyConfig {
    #[default]
    None,
    Fixed { mean_ms: u64 },
    /// Gaussian around `mean_ms`, truncated at zero, seeded from the run seed.
    Normal { mean_ms: u64, std_dev_ms: u64 },
}

/// How a market order consumes the opposing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketFillPolicy {
    /// The whole remaining quantity fills at the best opposing price.
    #[default]
    BestLevel,
    /// Walk the opposing levels like a limit order with no price bound.
    WalkBook,
}

fn default_margin_ratio() -> Decimal {
    Decimal::new(1, 2)
}

fn default_maintenance_fraction() -> Decimal {
    Decimal::new(5, 1)
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_data_types() -> Vec<DataKind> {
    vec![
        DataKind::Kline,
        DataKind::Trade,
        DataKind::Funding,
        DataKind::OpenInterest,
    ]
}

fn default_synthetic_depth() -> Decimal {
    Decimal::from(1_000_000)
}

fn default_annualization() -> f64 {
    252.0
}

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub symbols: Vec<String>,
    pub initial_capital: Decimal,
    pub leverage: Decimal,
    #[serde(default)]
    pub margin_mode: MarginMode,

    /// Initial margin ratio per symbol. Symbols not listed use `default_margin_ratio`.
    #[serde(default)]
    pub margin_ratios: BTreeMap<String, Decimal>,
    #[serde(default = "default_margin_ratio")]
    pub default_margin_ratio: Decimal,
    /// Maintenance margin as a fraction of the initial ratio.
    #[serde(default = "default_maintenance_fraction")]
    pub maintenance_margin_fraction: Decimal,

    #[serde(default)]
    pub slippage: SlippageConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub market_fill_policy: MarketFillPolicy,

    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_data_types")]
    pub data_types: Vec<DataKind>,
    /// Quantity placed on each side of a book synthesized from a kline.
    #[serde(default = "default_synthetic_depth")]
    pub kline_synthetic_depth: Decimal,
    #[serde(default = "default_annualization")]
    pub annualization_factor: f64,
}

impl BacktestConfig {
    /// Config with frictionless execution, leverage 1 and cross margin.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        symbols: Vec<String>,
        initial_capital: Decimal,
    ) -> Self {
        Self {
            start_time,
            end_time,
            symbols,
            initial_capital,
            leverage: Decimal::ONE,
            margin_mode: MarginMode::Cross,
            margin_ratios: BTreeMap::new(),
            default_margin_ratio: default_margin_ratio(),
            maintenance_margin_fraction: default_maintenance_fraction(),
            slippage: SlippageConfig::None,
            fees: FeeConfig::default(),
            latency: LatencyConfig::None,
            market_fill_policy: MarketFillPolicy::BestLevel,
            tick_interval_secs: default_tick_interval_secs(),
            seed: 0,
            data_types: default_data_types(),
            kline_synthetic_depth: default_synthetic_depth(),
            annualization_factor: default_annualization(),
        }
    }

    pub fn margin_ratio(&self, symbol: &str) -> Decimal {
        self.margin_ratios
            .get(symbol)
            .copied()
            .unwrap_or(self.default_margin_ratio)
    }

    /// Step between ticks. Saturates for values `validate` rejects.
    pub fn tick_interval(&self) -> Duration {
        i64::try_from(self.tick_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    pub fn wants(&self, kind: DataKind) -> bool {
        self.data_types.contains(&kind)
    }

    /// Check every rule that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_time <= self.start_time {
            return Err(ConfigError::invalid(
                "end_time",
                format!(
                    "end {} must be after start {}",
                    self.end_time, self.start_time
                ),
            ));
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::invalid("symbols", "at least one symbol is required"));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid("symbols", "symbol names must not be blank"));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }
        if self.leverage <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "leverage",
                format!("must be positive, got {}", self.leverage),
            ));
        }
        if self.data_types.is_empty() {
            return Err(ConfigError::invalid("data_types", "at least one data type is required"));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::invalid("tick_interval_secs", "must be positive"));
        }
        let step_fits = i64::try_from(self.tick_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .is_some_and(|step| self.end_time.checked_add_signed(step).is_some());
        if !step_fits {
            return Err(ConfigError::invalid(
                "tick_interval_secs",
                format!("{} seconds overflows the clock", self.tick_interval_secs),
            ));
        }
        check_latency(&self.latency)?;

        check_unit_ratio("default_margin_ratio", self.default_margin_ratio)?;
        for ratio in self.margin_ratios.values() {
            check_unit_ratio("margin_ratios", *ratio)?;
        }
        check_unit_ratio("maintenance_margin_fraction", self.maintenance_margin_fraction)?;

        if self.fees.maker_rate < Decimal::ZERO || self.fees.maker_rate >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "fees.maker_rate",
                format!("must be in [0, 1), got {}", self.fees.maker_rate),
            ));
        }
        if self.fees.taker_rate < Decimal::ZERO || self.fees.taker_rate >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "fees.taker_rate",
                format!("must be in [0, 1), got {}", self.fees.taker_rate),
            ));
        }
        if let SlippageConfig::FixedBps { bps } = self.slippage {
            if bps < Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "slippage.bps",
                    format!("must not be negative, got {bps}"),
                ));
            }
        }
        if self.kline_synthetic_depth <= Decimal::ZERO {
            return Err(ConfigError::invalid("kline_synthetic_depth", "must be positive"));
        }
        if !self.annualization_factor.is_finite() || self.annualization_factor <= 0.0 {
            return Err(ConfigError::invalid(
                "annualization_factor",
                format!("must be a positive number, got {}", self.annualization_factor),
            ));
        }
        Ok(())
    }

    /// Deterministic identity of this configuration.
    ///
    /// BLAKE3 over the canonical JSON form; maps are `BTreeMap` so key order is stable.
    pub fn fingerprint(&self) -> String {
        let canonical =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        blake3::hash(&canonical).to_hex().to_string()
    }
}

fn check_unit_ratio(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::invalid(
            field,
            format!("must be in (0, 1], got {value}"),
        ));
    }
    Ok(())
}

/// Upper bound for latency parameters, in milliseconds.
pub const MAX_LATENCY_MS: u64 = 86_400_000;

fn check_latency(latency: &LatencyConfig) -> Result<(), ConfigError> {
    let (mean_ms, std_dev_ms) = match *latency {
        LatencyConfig::None => return Ok(()),
        LatencyConfig::Fixed { mean_ms } => (mean_ms, 0),
        LatencyConfig::Normal { mean_ms, std_dev_ms } => (mean_ms, std_dev_ms),
    };
    if mean_ms > MAX_LATENCY_MS {
        return Err(ConfigError::invalid(
            "latency.mean_ms",
            format!("must be at most {MAX_LATENCY_MS}, got {mean_ms}"),
        ));
    }
    if std_dev_ms > MAX_LATENCY_MS {
        return Err(ConfigError::invalid(
            "latency.std_dev_ms",
            format!("must be at most {MAX_LATENCY_MS}, got {std_dev_ms}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base() -> BacktestConfig {
        BacktestConfig::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            vec!["BTCUSDT".into()],
            dec!(10000),
        )
    }

    fn field_of(err: ConfigError) -> &'static str {
        match err {
            ConfigError::InvalidField { field, .. } => field,
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = base();
        assert!(config.validate().is_ok());
        assert_eq!(config.margin_ratio("BTCUSDT"), dec!(0.01));
        assert_eq!(config.maintenance_margin_fraction, dec!(0.5));
        assert_eq!(config.tick_interval(), Duration::seconds(60));
    }

    #[test]
    fn inverted_window_rejected() {
        let mut config = base();
        config.end_time = config.start_time;
        assert_eq!(field_of(config.validate().unwrap_err()), "end_time");
    }

    #[test]
    fn empty_symbols_rejected() {
        let mut config = base();
        config.symbols.clear();
        assert_eq!(field_of(config.validate().unwrap_err()), "symbols");
    }

    #[test]
    fn non_positive_capital_and_leverage_rejected() {
        let mut config = base();
        config.initial_capital = Decimal::ZERO;
        assert_eq!(field_of(config.validate().unwrap_err()), "initial_capital");

        let mut config = base();
        config.leverage = dec!(-2);
        assert_eq!(field_of(config.validate().unwrap_err()), "leverage");
    }

    #[test]
    fn empty_data_types_rejected() {
        let mut config = base();
        config.data_types.clear();
        assert_eq!(field_of(config.validate().unwrap_err()), "data_types");
    }

    #[test]
    fn out_of_range_ratios_rejected() {
        let mut config = base();
        config.margin_ratios.insert("BTCUSDT".into(), dec!(1.5));
        assert_eq!(field_of(config.validate().unwrap_err()), "margin_ratios");

        let mut config = base();
        config.maintenance_margin_fraction = Decimal::ZERO;
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "maintenance_margin_fraction"
        );
    }

    #[test]
    fn error_message_names_field() {
        let mut config = base();
        config.tick_interval_secs = 0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.starts_with("invalid config: tick_interval_secs"), "{msg}");
    }

    #[test]
    fn per_symbol_ratio_overrides_default() {
        let mut config = base();
        config.margin_ratios.insert("ETHUSDT".into(), dec!(0.05));
        assert_eq!(config.margin_ratio("ETHUSDT"), dec!(0.05));
        assert_eq!(config.margin_ratio("BTCUSDT"), dec!(0.01));
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = base();
        let b = base();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut c = base();
        c.seed = 7;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn json_roundtrip_fills_defaults() {
        let json = r#"{
            "start_time": "2024-01-01T00:00:00Z",
            "end_time": "2024-01-02T00:00:00Z",
            "symbols": ["BTCUSDT"],
            "initial_capital": "10000",
            "leverage": 10,
            "slippage": {"type": "fixed_bps", "bps": "5"},
            "latency": {"type": "normal", "mean_ms": 50, "std_dev_ms": 10}
        }"#;
        let config: BacktestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.leverage, dec!(10));
        assert_eq!(config.slippage, SlippageConfig::FixedBps { bps: dec!(5) });
        assert_eq!(
            config.latency,
            LatencyConfig::Normal {
                mean_ms: 50,
                std_dev_ms: 10
            }
        );
        assert_eq!(config.data_types, default_data_types());
        assert!((config.annualization_factor - 252.0).abs() < 1e-10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_tick_interval_rejected() {
        let mut config = base();
        config.tick_interval_secs = 10_000_000_000_000;
        assert_eq!(field_of(config.validate().unwrap_err()), "tick_interval_secs");

        config.tick_interval_secs = u64::MAX;
        assert_eq!(field_of(config.validate().unwrap_err()), "tick_interval_secs");
        assert!(config.tick_interval() > Duration::zero());
    }

    #[test]
    fn latency_bounded() {
        let mut config = base();
        config.latency = LatencyConfig::Fixed {
            mean_ms: 10_000_000_000_000_000,
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "latency.mean_ms");

        config.latency = LatencyConfig::Normal {
            mean_ms: 50,
            std_dev_ms: u64::MAX,
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "latency.std_dev_ms");

        config.latency = LatencyConfig::Fixed {
            mean_ms: MAX_LATENCY_MS,
        };
        assert!(config.validate().is_ok());
    }
}
