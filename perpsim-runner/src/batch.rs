//! Batch execution of independent backtests.
//!
//! Each job owns its config and feed; runs share nothing, so they parallelize
//! across threads with rayon. Outcomes come back in job order whichever way
//! they were executed.

use perpsim_core::cancel::CancellationToken;
use perpsim_core::config::BacktestConfig;
use perpsim_core::engine::{run_backtest, BacktestError, BacktestResult};
use perpsim_core::feed::InMemoryFeed;
use perpsim_core::strategy::Strategy;
use rayon::prelude::*;
use tracing::{info, warn};

/// One backtest to run.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub config: BacktestConfig,
    pub feed: InMemoryFeed,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, config: BacktestConfig, feed: InMemoryFeed) -> Self {
        Self {
            name: name.into(),
            config,
            feed,
        }
    }
}

/// Result of one job. A failing job does not abort the batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub name: String,
    pub result: Result<BacktestResult, BacktestError>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Batch executor.
///
/// Runs jobs in parallel by default. A shared cancellation token, when set,
/// is passed to every run.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    parallel: bool,
    cancel: Option<CancellationToken>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            parallel: true,
            cancel: None,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run every job with a strategy built fresh by `factory`.
    ///
    /// Every job replays its own copy of the feed, so the caller's jobs stay
    /// reusable.
    pub fn run<F>(&self, jobs: &[BatchJob], factory: F) -> Vec<BatchOutcome>
    where
        F: Fn(&BatchJob) -> Box<dyn Strategy> + Sync,
    {
        info!(jobs = jobs.len(), parallel = self.parallel, "starting batch");

        let run_one = |job: &BatchJob| {
            let mut feed = job.feed.clone();
            let mut strategy = factory(job);
            let result = run_backtest(
                &job.config,
                &mut feed,
                strategy.as_mut(),
                self.cancel.as_ref(),
            );
            if let Err(e) = &result {
                warn!(job = %job.name, error = %e, "batch job failed");
            }
            BatchOutcome {
                name: job.name.clone(),
                result,
            }
        };

        let outcomes: Vec<BatchOutcome> = if self.parallel {
            jobs.par_iter().map(run_one).collect()
        } else {
            jobs.iter().map(run_one).collect()
        };

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(completed = outcomes.len() - failed, failed, "batch finished");
        outcomes
    }
}

/// Run `jobs` in parallel with the default runner.
pub fn run_batch<F>(jobs: &[BatchJob], factory: F) -> Vec<BatchOutcome>
where
    F: Fn(&BatchJob) -> Box<dyn Strategy> + Sync,
{
    BatchRunner::new().run(jobs, factory)
}
