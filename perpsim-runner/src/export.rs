//! Result export: JSON, CSV and Markdown artifacts.
//!
//! - **JSON**: the full `RunArtifact` with schema versioning
//! - **CSV**: trade tape and equity/drawdown curve
//! - **Markdown**: a short human-readable report
//!
//! Persisted artifacts carry a `schema_version`. Newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use perpsim_core::config::BacktestConfig;
use perpsim_core::domain::{OrderSide, Trade};
use perpsim_core::engine::{BacktestResult, DrawdownPoint, EquityPoint, RunStatus};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// A finished run together with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    pub strategy: String,
    pub config: BacktestConfig,
    pub result: BacktestResult,
}

impl RunArtifact {
    pub fn new(
        name: impl Into<String>,
        strategy: impl Into<String>,
        config: BacktestConfig,
        result: BacktestResult,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
            strategy: strategy.into(),
            config,
            result,
        }
    }

    /// Directory name: run name plus a fingerprint prefix.
    pub fn dir_name(&self) -> String {
        let prefix: String = self.result.fingerprint.chars().take(12).collect();
        format!("{}_{}", sanitize(&self.name), prefix)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(artifact: &RunArtifact) -> Result<String> {
    serde_json::to_string_pretty(artifact).context("failed to serialize run artifact to JSON")
}

/// Deserialize a `RunArtifact`, rejecting schema versions newer than ours.
pub fn import_json(json: &str) -> Result<RunArtifact> {
    let artifact: RunArtifact =
        serde_json::from_str(json).context("failed to deserialize run artifact from JSON")?;
    if artifact.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            artifact.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(artifact)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

/// Trade tape. Decimals are written at full precision.
///
/// Columns: id, order_id, symbol, side, price, quantity, notional, fee, timestamp
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "order_id",
        "symbol",
        "side",
        "price",
        "quantity",
        "notional",
        "fee",
        "timestamp",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.id.0.to_string(),
            &t.order_id.0.to_string(),
            &t.symbol,
            side_str(t.side),
            &t.price.to_string(),
            &t.quantity.to_string(),
            &t.notional().to_string(),
            &t.fee.to_string(),
            &t.timestamp.to_rfc3339(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Equity and drawdown per tick.
///
/// Columns: timestamp, equity, pnl, drawdown, drawdown_duration_secs
pub fn export_equity_csv(equity: &[EquityPoint], drawdown: &[DrawdownPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "timestamp",
        "equity",
        "pnl",
        "drawdown",
        "drawdown_duration_secs",
    ])?;
    for (i, point) in equity.iter().enumerate() {
        let (dd, duration) = drawdown
            .get(i)
            .map(|d| (format!("{:.6}", d.drawdown), d.duration_secs.to_string()))
            .unwrap_or_default();
        wtr.write_record([
            &point.timestamp.to_rfc3339(),
            &point.equity.to_string(),
            &point.pnl.to_string(),
            &dd,
            &duration,
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for one run.
///
/// Creates `{name}_{fingerprint prefix}/` under `output_dir` containing:
/// - `manifest.json`: the full `RunArtifact`
/// - `trades.csv`: trade tape
/// - `equity.csv`: equity and drawdown curve
/// - `report.md`: summary report
///
/// The directory name is derived from the run, so saving the same run twice
/// overwrites in place. Returns the directory path.
pub fn save_artifacts(artifact: &RunArtifact, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(artifact.dir_name());
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let write = |file: &str, content: String| {
        let path = run_dir.join(file);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))
    };

    write("manifest.json", export_json(artifact)?)?;
    write("trades.csv", export_trades_csv(&artifact.result.trades)?)?;
    write(
        "equity.csv",
        export_equity_csv(&artifact.result.equity_curve, &artifact.result.drawdown_curve)?,
    )?;
    write("report.md", generate_report(artifact))?;

    tracing::info!(dir = %run_dir.display(), "artifacts saved");
    Ok(run_dir)
}

/// Load a `RunArtifact` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<RunArtifact> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

pub fn generate_report(artifact: &RunArtifact) -> String {
    let r = &artifact.result;
    let s = &r.stats;
    let mut md = String::with_capacity(2048);

    md.push_str(&format!("# Backtest Report: {}\n\n", artifact.name));

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Strategy | {} |\n", artifact.strategy));
    md.push_str(&format!("| Symbols | {} |\n", artifact.config.symbols.join(", ")));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        r.start_time.to_rfc3339(),
        r.end_time.to_rfc3339()
    ));
    md.push_str(&format!("| Margin Mode | {:?} |\n", artifact.config.margin_mode));
    md.push_str(&format!("| Leverage | {} |\n", artifact.config.leverage));
    md.push_str(&format!("| Ticks | {} |\n", r.ticks_processed));
    md.push_str(&format!("| Fingerprint | {} |\n", r.fingerprint));
    if r.status == RunStatus::Cancelled {
        md.push_str("| Status | **CANCELLED** |\n");
    }
    md.push('\n');

    md.push_str("## Performance\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Initial Value | {} |\n", r.initial_value));
    md.push_str(&format!("| Final Value | {} |\n", r.final_value));
    md.push_str(&format!("| PnL | {} ({:.2}%) |\n", r.pnl, r.pnl_percent));
    md.push_str(&format!("| Annual Return | {:.2}% |\n", s.annual_return * 100.0));
    md.push_str(&format!("| Sharpe | {:.3} |\n", s.sharpe_ratio));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", s.max_drawdown * 100.0));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", s.win_rate * 100.0));
    md.push_str(&format!("| Profit Factor | {:.2} |\n", s.profit_factor));
    md.push_str(&format!("| Trades | {} |\n", s.trade_count));
    md.push_str(&format!("| Total Fees | {:.4} |\n", s.total_fees));
    md.push_str(&format!("| Rejected Orders | {} |\n", r.rejected_orders));
    md.push_str(&format!("| Liquidations | {} |\n", r.liquidations.len()));
    md.push('\n');

    if !r.final_positions.is_empty() {
        md.push_str("## Open Positions\n\n");
        md.push_str("| Symbol | Net Qty | Entry | Mark | Unrealized |\n");
        md.push_str("| --- | --- | --- | --- | --- |\n");
        for p in &r.final_positions {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                p.symbol,
                p.net_quantity(),
                p.entry_price,
                p.mark_price.map_or_else(|| "-".to_string(), |m| m.to_string()),
                p.unrealized_pnl
            ));
        }
        md.push('\n');
    }

    md
}
