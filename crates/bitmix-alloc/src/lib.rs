//! Mixed-precision bit-width allocation
//!
//! This crate picks a per-component bit-width for a network under a
//! performance budget, in two phases:
//! - Sensitivity analysis: every component is probed in isolation at every
//!   non-baseline candidate bit-width and scored.
//! - Planning: probes are committed greedily, most tolerant first, to a single
//!   working network while performance stays at or above gamma.
//!
//! [`MixedPrecisionAllocator`] chains both phases and produces an
//! [`AllocationReport`] with sizes under a configurable [`CostModel`].
//! Networks and evaluators are supplied by the caller through the
//! [`NetworkModel`] and [`Evaluator`] traits.

pub mod allocator;
pub mod criteria;
pub mod evaluator;
pub mod network;
pub mod planner;
pub mod sensitivity;
pub mod size;
pub mod space;

pub use allocator::{AllocationReport, MixedPrecisionAllocator, ReportSummary};
pub use criteria::{Criteria, EvaluationCriteria, FnCriteria, criteria_fn};
pub use evaluator::{
    CancellationToken, EvalContext, Evaluator, FnEvaluator, evaluate_guarded, evaluator_fn,
};
pub use network::NetworkModel;
pub use planner::{AllocationPlanner, PlanOutcome, PlanStep, PlannerOptions};
pub use sensitivity::{
    AnalyzerOptions, SensitivityAnalysis, SensitivityAnalyzer, SensitivityRecord, SkippedProbe,
};
pub use size::{CostModel, SizeEstimator};
pub use space::SearchSpace;
