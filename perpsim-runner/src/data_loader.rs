//! Market data loading for the runner.
//!
//! Two on-disk formats feed the engine:
//! 1. Kline CSV with header `timestamp,open,high,low,close,volume`; timestamps
//!    are RFC 3339 or epoch milliseconds
//! 2. JSON Lines, one serialized `MarketDataPoint` per line (any payload type)
//!
//! Everything is read up front and merged into a single `InMemoryFeed`, so
//! the engine loop never touches the filesystem.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use perpsim_core::domain::{DataKind, Kline, MarketDataPoint, MarketPayload};
use perpsim_core::feed::InMemoryFeed;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DataSection;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("{path} line {line}: {message}")]
    Malformed {
        path: PathBuf,
        line: u64,
        message: String,
    },
}

impl LoadError {
    fn malformed(path: &Path, line: u64, message: impl Into<String>) -> Self {
        LoadError::Malformed {
            path: path.to_path_buf(),
            line,
            message: message.into(),
        }
    }
}

/// Row of a kline CSV, kept as text so decimals parse exactly.
#[derive(Debug, Deserialize)]
struct KlineRow {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

/// Parse an RFC 3339 timestamp or integer epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Load one kline CSV file for `symbol`.
pub fn load_klines_csv(path: &Path, symbol: &str) -> Result<Vec<MarketDataPoint>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut points = Vec::new();
    for (i, row) in reader.deserialize::<KlineRow>().enumerate() {
        // Header is line 1.
        let line = i as u64 + 2;
        let row = row.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
            LoadError::malformed(path, line, format!("unparseable timestamp '{}'", row.timestamp))
        })?;
        let decimal = |name: &str, value: &str| {
            Decimal::from_str(value.trim()).map_err(|e| {
                LoadError::malformed(path, line, format!("{name} '{value}': {e}"))
            })
        };
        let kline = Kline {
            open: decimal("open", &row.open)?,
            high: decimal("high", &row.high)?,
            low: decimal("low", &row.low)?,
            close: decimal("close", &row.close)?,
            volume: decimal("volume", &row.volume)?,
        };
        points.push(MarketDataPoint::new(symbol, timestamp, MarketPayload::Kline(kline)));
    }
    debug!(path = %path.display(), symbol, rows = points.len(), "loaded klines");
    Ok(points)
}

/// Load a JSON Lines file of `MarketDataPoint`s. Blank lines are ignored.
pub fn load_jsonl(path: &Path) -> Result<Vec<MarketDataPoint>, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut points = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line_no = i as u64 + 1;
        let line = line.map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let point: MarketDataPoint = serde_json::from_str(&line)
            .map_err(|e| LoadError::malformed(path, line_no, e.to_string()))?;
        points.push(point);
    }
    debug!(path = %path.display(), points = points.len(), "loaded events");
    Ok(points)
}

/// Load every configured source and merge into one feed of the requested kinds.
///
/// Points with equal timestamps keep file order: kline files first, in the
/// order listed, then event files.
pub fn load_feed(data: &DataSection, kinds: &[DataKind]) -> Result<InMemoryFeed, LoadError> {
    let mut points = Vec::new();
    for source in &data.klines {
        points.extend(load_klines_csv(&source.path, &source.symbol)?);
    }
    for path in &data.events {
        points.extend(load_jsonl(path)?);
    }
    let loaded = points.len();
    let feed = InMemoryFeed::new(points).retain_kinds(kinds);
    info!(loaded, kept = feed.len(), "market data ready");
    Ok(feed)
}
