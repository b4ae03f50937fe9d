//! TOML run files.
//!
//! A run file bundles everything one backtest needs:
//! - `[backtest]`: the engine `BacktestConfig`
//! - `[data]`: kline CSV files and JSON Lines event files
//! - `[strategy]`: which built-in strategy to run
//!
//! Relative data paths resolve against the directory of the run file.

use std::path::{Path, PathBuf};

use perpsim_core::config::{BacktestConfig, ConfigError};
use perpsim_core::strategy::{BuyAndHold, HoldStrategy, Strategy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading or checking a run file.
#[derive(Debug, Error)]
pub enum RunFileError {
    #[error("failed to read run file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse run file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no data files configured")]
    NoData,

    #[error("kline file {path} is for symbol {symbol}, which is not in backtest.symbols")]
    UnknownKlineSymbol { symbol: String, path: PathBuf },
}

/// One kline CSV file and the symbol its rows belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineSource {
    pub symbol: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default)]
    pub klines: Vec<KlineSource>,
    /// JSON Lines files of serialized `MarketDataPoint`s (any payload type).
    #[serde(default)]
    pub events: Vec<PathBuf>,
}

impl DataSection {
    pub fn is_empty(&self) -> bool {
        self.klines.is_empty() && self.events.is_empty()
    }
}

/// Built-in strategies selectable from a run file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Market-buy `quantity` of each symbol once, then hold.
    BuyAndHold { quantity: Decimal },
    /// Never trade; the equity curve stays at initial capital.
    #[default]
    Hold,
}

impl StrategyConfig {
    /// Fresh strategy instance. Every run gets its own.
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::BuyAndHold { quantity } => Box::new(BuyAndHold::new(*quantity)),
            StrategyConfig::Hold => Box::new(HoldStrategy),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::BuyAndHold { .. } => "buy_and_hold",
            StrategyConfig::Hold => "hold",
        }
    }
}

/// Parsed run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    /// Label used for artifact directories. Defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl RunFile {
    /// Parse TOML text. Relative paths are left as written.
    pub fn from_toml(content: &str) -> Result<Self, RunFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a run file, resolving data paths against its directory.
    pub fn from_file(path: &Path) -> Result<Self, RunFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| RunFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut run = Self::from_toml(&content)?;
        if run.name.is_none() {
            run.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        if let Some(base) = path.parent() {
            run.resolve_paths(base);
        }
        Ok(run)
    }

    /// Make every relative data path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for source in &mut self.data.klines {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
        for path in &mut self.data.events {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("run")
    }

    /// Engine config rules plus the run file's own consistency checks.
    pub fn validate(&self) -> Result<(), RunFileError> {
        self.backtest.validate()?;
        if self.data.is_empty() {
            return Err(RunFileError::NoData);
        }
        if let Some(source) = self
            .data
            .klines
            .iter()
            .find(|k| !self.backtest.symbols.contains(&k.symbol))
        {
            return Err(RunFileError::UnknownKlineSymbol {
                symbol: source.symbol.clone(),
                path: source.path.clone(),
            });
        }
        Ok(())
    }
}
