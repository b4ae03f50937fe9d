//! Order execution: cost models and the matching engine.
//!
//! Cost models are configured once per run and bundled in `CostModels`.
//! The matching engine owns resting orders and turns book snapshots into
//! trades; it never touches the account directly. Every fill passes through a
//! caller-supplied gate (normally the position manager) before it commits.

pub mod cost_model;
pub mod latency;
pub mod matching;

pub use cost_model::{
    fee_from_config, slippage_from_config, FeeModel, FixedBpsSlippage, NoSlippage, SlippageModel,
    TakerFee, ZeroFee,
};
pub use latency::{latency_from_config, FixedLatency, LatencyModel, NoLatency, NormalLatency};
pub use matching::{OrderError, OrderMatchingEngine};

use crate::config::BacktestConfig;
use crate::rng::RngHierarchy;

/// The three cost models a run executes with.
#[derive(Debug)]
pub struct CostModels {
    pub slippage: Box<dyn SlippageModel>,
    pub fee: Box<dyn FeeModel>,
    pub latency: Box<dyn LatencyModel>,
}

impl CostModels {
    pub fn from_config(config: &BacktestConfig) -> Self {
        let rng = RngHierarchy::new(config.seed);
        Self {
            slippage: slippage_from_config(&config.slippage),
            fee: fee_from_config(&config.fees),
            latency: latency_from_config(&config.latency, &rng),
        }
    }

    /// No slippage, no fees, no latency.
    pub fn frictionless() -> Self {
        Self {
            slippage: Box::new(NoSlippage),
            fee: Box::new(ZeroFee),
            latency: Box::new(NoLatency),
        }
    }
}
