//! PerpSim Runner: run files, data loading, batch execution and export.
//!
//! This crate builds on `perpsim-core` to provide:
//! - TOML run files naming the engine config, data files and strategy
//! - Kline CSV and JSON Lines loading into an in-memory feed
//! - Parallel batch runs with rayon
//! - JSON/CSV/Markdown artifacts with schema versioning

pub mod batch;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;

pub use batch::{run_batch, BatchJob, BatchOutcome, BatchRunner};
pub use config::{DataSection, KlineSource, RunFile, RunFileError, StrategyConfig};
pub use data_loader::{load_feed, load_jsonl, load_klines_csv, LoadError};
pub use export::{load_artifacts, save_artifacts, RunArtifact, SCHEMA_VERSION};
pub use runner::{run, run_files, run_from_file, validate_run_file, ValidationSummary};
