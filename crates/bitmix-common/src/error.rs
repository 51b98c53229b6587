//! Error types for allocation runs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{BitWidth, ComponentId, Phase, PrecisionMap};

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, BitmixError>;

/// Failure reported by an evaluator for a single network snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("evaluation produced a non-comparable score: {0}")]
    NonFinite(f64),

    #[error("evaluation exceeded its deadline after {elapsed:?} (limit {limit:?})")]
    TimedOut { elapsed: Duration, limit: Duration },

    #[error("evaluation cancelled")]
    Cancelled,
}

impl EvalError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Coarse classification of [`BitmixError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    EvaluationFailure,
    EvaluationTimeout,
    Cancelled,
    MissingComponent,
    Internal,
}

/// Errors produced by the allocation pipeline.
#[derive(Debug, Error)]
pub enum BitmixError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{phase} evaluation failed{}: {reason}", probe_suffix(.component, .bit_width))]
    EvaluationFailure {
        phase: Phase,
        component: Option<ComponentId>,
        bit_width: Option<BitWidth>,
        reason: String,
    },

    #[error(
        "{phase} evaluation timed out{} after {elapsed:?} (limit {limit:?})",
        probe_suffix(.component, .bit_width)
    )]
    EvaluationTimeout {
        phase: Phase,
        component: Option<ComponentId>,
        bit_width: Option<BitWidth>,
        elapsed: Duration,
        limit: Duration,
    },

    #[error("{phase} cancelled by caller")]
    Cancelled { phase: Phase },

    #[error("component '{0}' has no entry in the network or cost model")]
    MissingComponent(ComponentId),

    #[error("allocation walk aborted with partial network {partial}: {source}")]
    PlannerAborted {
        partial: PrecisionMap,
        #[source]
        source: Box<BitmixError>,
    },

    #[error("failed to build evaluation thread pool: {0}")]
    ThreadPool(String),

    #[error("failed to read configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

fn probe_suffix(component: &Option<ComponentId>, bit_width: &Option<BitWidth>) -> String {
    match (component, bit_width) {
        (Some(c), Some(b)) => format!(" for {c} at {b}"),
        (Some(c), None) => format!(" for {c}"),
        _ => String::new(),
    }
}

impl BitmixError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Lift an evaluator error into the pipeline taxonomy, scoped to a phase
    /// and (optionally) the probe that triggered it.
    pub fn from_eval(
        err: EvalError,
        phase: Phase,
        component: Option<ComponentId>,
        bit_width: Option<BitWidth>,
    ) -> Self {
        match err {
            EvalError::TimedOut { elapsed, limit } => {
                Self::EvaluationTimeout { phase, component, bit_width, elapsed, limit }
            }
            EvalError::Cancelled => Self::Cancelled { phase },
            other => Self::EvaluationFailure {
                phase,
                component,
                bit_width,
                reason: other.to_string(),
            },
        }
    }

    /// Classify this error. [`BitmixError::PlannerAborted`] reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) | Self::Config { .. } => ErrorKind::InvalidConfiguration,
            Self::EvaluationFailure { .. } => ErrorKind::EvaluationFailure,
            Self::EvaluationTimeout { .. } => ErrorKind::EvaluationTimeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::MissingComponent(_) => ErrorKind::MissingComponent,
            Self::PlannerAborted { source, .. } => source.kind(),
            Self::ThreadPool(_) => ErrorKind::Internal,
        }
    }

    /// Phase in which the error surfaced, if it is tied to one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::InvalidConfiguration(_) | Self::Config { .. } => Some(Phase::Validation),
            Self::EvaluationFailure { phase, .. }
            | Self::EvaluationTimeout { phase, .. }
            | Self::Cancelled { phase } => Some(*phase),
            Self::PlannerAborted { .. } => Some(Phase::Planning),
            Self::MissingComponent(_) | Self::ThreadPool(_) => None,
        }
    }

    /// Component whose probe or step triggered the error, if any.
    pub fn component(&self) -> Option<&ComponentId> {
        match self {
            Self::EvaluationFailure { component, .. }
            | Self::EvaluationTimeout { component, .. } => component.as_ref(),
            Self::MissingComponent(c) => Some(c),
            Self::PlannerAborted { source, .. } => source.component(),
            _ => None,
        }
    }

    /// Partial network left behind by an aborted allocation walk.
    pub fn partial_network(&self) -> Option<&PrecisionMap> {
        match self {
            Self::PlannerAborted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
