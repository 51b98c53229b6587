//! CLI subcommands

pub mod allocate;
pub mod check;

pub use allocate::{AllocateCommand, OutputFormat, allocate, render};
pub use check::{CheckCommand, CheckSummary, check};
