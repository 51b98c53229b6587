//! Common types, errors and configuration for bitmix
//!
//! This crate provides the vocabulary shared across the bitmix workspace:
//! component and bit-width identifiers, the concrete [`PrecisionMap`] network
//! representation, the error taxonomy, and the layered run configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AllocationConfig, AnalysisConfig, BitmixConfig, ConfigBuilder, CostModelSpec, CriteriaSpec,
    FailurePolicy, LoggingConfig, PlanningConfig, RankingStrategy, ViolationPolicy,
    parse_candidates, read_document,
};
pub use error::{BitmixError, ErrorKind, EvalError, Result};
pub use types::{BitWidth, ComponentId, Phase, PrecisionMap};
