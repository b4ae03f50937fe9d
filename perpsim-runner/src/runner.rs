//! Run orchestration: run files in, artifacts out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use perpsim_core::cancel::CancellationToken;
use perpsim_core::engine::BacktestDriver;
use tracing::info;

use crate::batch::{BatchJob, BatchRunner};
use crate::config::{RunFile, StrategyConfig};
use crate::data_loader::load_feed;
use crate::export::RunArtifact;

/// What `validate_run_file` found, without running anything.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSummary {
    pub name: String,
    pub strategy: &'static str,
    pub symbols: Vec<String>,
    pub points: usize,
    pub fingerprint: String,
}

/// Run an already-parsed run file.
pub fn run(run_file: &RunFile, cancel: Option<&CancellationToken>) -> Result<RunArtifact> {
    run_file.validate().context("invalid run file")?;
    let driver = BacktestDriver::new(run_file.backtest.clone())?;
    let mut feed = load_feed(&run_file.data, &run_file.backtest.data_types)
        .context("failed to load market data")?;
    let mut strategy = run_file.strategy.build();

    info!(
        name = run_file.name(),
        strategy = run_file.strategy.name(),
        points = feed.len(),
        "running backtest"
    );
    let result = driver
        .run(&mut feed, strategy.as_mut(), cancel)
        .with_context(|| format!("backtest '{}' failed", run_file.name()))?;

    Ok(RunArtifact::new(
        run_file.name(),
        run_file.strategy.name(),
        run_file.backtest.clone(),
        result,
    ))
}

/// Load a run file from disk and execute it.
pub fn run_from_file(path: &Path, cancel: Option<&CancellationToken>) -> Result<RunArtifact> {
    let run_file = RunFile::from_file(path)
        .with_context(|| format!("failed to load run file {}", path.display()))?;
    run(&run_file, cancel)
}

/// Parse, validate and load the data of a run file without running it.
pub fn validate_run_file(path: &Path) -> Result<ValidationSummary> {
    let run_file = RunFile::from_file(path)
        .with_context(|| format!("failed to load run file {}", path.display()))?;
    run_file.validate().context("invalid run file")?;
    let feed = load_feed(&run_file.data, &run_file.backtest.data_types)
        .context("failed to load market data")?;

    Ok(ValidationSummary {
        name: run_file.name().to_string(),
        strategy: run_file.strategy.name(),
        symbols: run_file.backtest.symbols.clone(),
        points: feed.len(),
        fingerprint: run_file.backtest.fingerprint(),
    })
}

/// Load several run files and execute them as one batch.
///
/// Loading failures abort before anything runs. Per-run engine failures are
/// returned in the outcome list, in input order.
pub fn run_files(
    paths: &[PathBuf],
    runner: &BatchRunner,
) -> Result<Vec<(String, Result<RunArtifact>)>> {
    let mut run_files = Vec::with_capacity(paths.len());
    let mut jobs = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let run_file = RunFile::from_file(path)
            .with_context(|| format!("failed to load run file {}", path.display()))?;
        run_file
            .validate()
            .with_context(|| format!("invalid run file {}", path.display()))?;
        let feed = load_feed(&run_file.data, &run_file.backtest.data_types)
            .with_context(|| format!("failed to load market data for {}", path.display()))?;
        // Index suffix keeps job names unique when run files share a name.
        let job_name = format!("{}#{i}", run_file.name());
        jobs.push(BatchJob::new(job_name, run_file.backtest.clone(), feed));
        run_files.push(run_file);
    }

    let strategies: HashMap<&str, &RunFile> = jobs
        .iter()
        .zip(&run_files)
        .map(|(job, run_file)| (job.name.as_str(), run_file))
        .collect();
    let outcomes = runner.run(&jobs, |job| match strategies.get(job.name.as_str()) {
        Some(run_file) => run_file.strategy.build(),
        None => StrategyConfig::default().build(),
    });

    Ok(outcomes
        .into_iter()
        .zip(&run_files)
        .map(|(outcome, run_file)| {
            let artifact = outcome
                .result
                .map(|result| {
                    RunArtifact::new(
                        run_file.name(),
                        run_file.strategy.name(),
                        run_file.backtest.clone(),
                        result,
                    )
                })
                .with_context(|| format!("backtest '{}' failed", run_file.name()));
            (run_file.name().to_string(), artifact)
        })
        .collect())
}
