//! bitmix CLI library
//!
//! Run-file loading, the synthetic penalty evaluator and the subcommands,
//! exposed for the `bitmix` binary and its tests.

pub mod commands;
pub mod exit;
pub mod penalty;
pub mod run_file;

pub use penalty::{PenaltyConfig, PenaltyEvaluator};
pub use run_file::RunFile;
