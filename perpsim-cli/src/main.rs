//! PerpSim CLI: run and inspect perpetual-futures backtests.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML run file and save artifacts
//! - `validate`: parse a run file and load its data without running
//! - `batch`: run several run files in parallel
//! - `show`: print the summary of a saved artifact directory
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use perpsim_core::engine::RunStatus;
use perpsim_runner::{
    load_artifacts, run_files, run_from_file, save_artifacts, validate_run_file, BatchRunner,
    RunArtifact,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "perpsim",
    about = "PerpSim CLI: event-driven backtesting for perpetual futures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML run file.
    Run {
        /// Path to the run file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the summary only, without writing artifacts.
        #[arg(long, default_value_t = false)]
        no_save: bool,
    },
    /// Check a run file and its data without running it.
    Validate {
        /// Path to the run file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run several run files as one batch.
    Batch {
        /// Run files to execute.
        #[arg(required = true)]
        configs: Vec<PathBuf>,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Run one backtest at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },
    /// Print the summary of a saved artifact directory.
    Show {
        /// Artifact directory containing manifest.json.
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            no_save,
        } => run_cmd(config, output_dir, no_save),
        Commands::Validate { config } => validate_cmd(config),
        Commands::Batch {
            configs,
            output_dir,
            sequential,
        } => batch_cmd(configs, output_dir, sequential),
        Commands::Show { dir } => {
            let artifact = load_artifacts(&dir)?;
            print_summary(&artifact);
            Ok(())
        }
    }
}

fn run_cmd(config: PathBuf, output_dir: PathBuf, no_save: bool) -> Result<()> {
    let artifact = run_from_file(&config, None)?;
    print_summary(&artifact);

    if !no_save {
        let run_dir = save_artifacts(&artifact, &output_dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn validate_cmd(config: PathBuf) -> Result<()> {
    let summary = validate_run_file(&config)?;
    println!("Run file OK: {}", config.display());
    println!("Name:           {}", summary.name);
    println!("Strategy:       {}", summary.strategy);
    println!("Symbols:        {}", summary.symbols.join(", "));
    println!("Data points:    {}", summary.points);
    println!("Fingerprint:    {}", summary.fingerprint);
    Ok(())
}

fn batch_cmd(configs: Vec<PathBuf>, output_dir: PathBuf, sequential: bool) -> Result<()> {
    let runner = BatchRunner::new().with_parallelism(!sequential);
    let outcomes = run_files(&configs, &runner)?;

    let mut failed = 0usize;
    println!(
        "{:<24} {:>14} {:>10} {:>8} {:>8}",
        "Run", "Final Value", "Return", "MaxDD", "Trades"
    );
    println!("{}", "-".repeat(68));
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(artifact) => {
                let r = &artifact.result;
                println!(
                    "{:<24} {:>14} {:>9.2}% {:>7.2}% {:>8}",
                    name,
                    r.final_value.round_dp(2),
                    r.pnl_percent,
                    r.stats.max_drawdown * 100.0,
                    r.trades.len()
                );
                save_artifacts(artifact, &output_dir)?;
            }
            Err(e) => {
                failed += 1;
                println!("{name:<24} FAILED: {e:#}");
            }
        }
    }
    println!("Artifacts saved to: {}", output_dir.display());

    if failed > 0 {
        bail!("{failed} of {} runs failed", outcomes.len());
    }
    Ok(())
}

fn print_summary(artifact: &RunArtifact) {
    let r = &artifact.result;
    let s = &r.stats;
    println!();
    println!("=== Backtest Result: {} ===", artifact.name);
    println!("Strategy:       {}", artifact.strategy);
    println!("Symbols:        {}", artifact.config.symbols.join(", "));
    println!("Period:         {} to {}", r.start_time, r.end_time);
    println!("Ticks:          {}", r.ticks_processed);
    println!("Trades:         {}", s.trade_count);
    println!("Rejected:       {}", r.rejected_orders);
    println!("Liquidations:   {}", r.liquidations.len());
    println!();
    println!("--- Performance ---");
    println!("Initial Value:  {}", r.initial_value);
    println!("Final Value:    {}", r.final_value);
    println!("PnL:            {} ({:.2}%)", r.pnl, r.pnl_percent);
    println!("Annual Return:  {:.2}%", s.annual_return * 100.0);
    println!("Sharpe:         {:.3}", s.sharpe_ratio);
    println!("Max Drawdown:   {:.2}%", s.max_drawdown * 100.0);
    println!("Win Rate:       {:.1}%", s.win_rate * 100.0);
    println!("Profit Factor:  {:.2}", s.profit_factor);
    println!("Avg Hold:       {:.0}s", s.avg_holding_time_secs);
    println!("Total Fees:     {:.4}", s.total_fees);
    if r.status == RunStatus::Cancelled {
        println!();
        println!("WARNING: run was cancelled before end_time");
    }
    println!("Fingerprint:    {}", r.fingerprint);
}
