//! End-to-end allocation: sensitivity analysis, planning, reporting.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use bitmix_common::{
    BitWidth, BitmixConfig, BitmixError, ComponentId, Phase, PrecisionMap, Result,
};

use crate::criteria::{Criteria, EvaluationCriteria};
use crate::evaluator::{CancellationToken, Evaluator, evaluate_guarded};
use crate::network::NetworkModel;
use crate::planner::{AllocationPlanner, PlanStep, PlannerOptions};
use crate::sensitivity::{AnalyzerOptions, SensitivityAnalysis, SensitivityAnalyzer};
use crate::size::SizeEstimator;
use crate::space::SearchSpace;

/// Chains the analyzer and the planner over one baseline network.
#[derive(Clone)]
pub struct MixedPrecisionAllocator {
    components: Vec<ComponentId>,
    candidates: Vec<BitWidth>,
    baseline_bits: BitWidth,
    gamma: f64,
    criteria: Arc<dyn EvaluationCriteria>,
    analyzer: SensitivityAnalyzer,
    planner: AllocationPlanner,
    estimator: SizeEstimator,
    cancel: CancellationToken,
}

impl std::fmt::Debug for MixedPrecisionAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixedPrecisionAllocator")
            .field("components", &self.components)
            .field("candidates", &self.candidates)
            .field("baseline_bits", &self.baseline_bits)
            .field("gamma", &self.gamma)
            .field("analyzer", &self.analyzer)
            .field("planner", &self.planner)
            .field("estimator", &self.estimator)
            .finish_non_exhaustive()
    }
}

impl MixedPrecisionAllocator {
    /// Build an allocator from a validated run configuration.
    pub fn from_config(config: &BitmixConfig) -> Result<Self> {
        config.validate()?;
        let alloc = &config.allocation;
        let estimator = SizeEstimator::from_spec(&alloc.cost_model);
        Ok(Self {
            components: alloc.components.clone(),
            candidates: alloc.candidates.clone(),
            baseline_bits: alloc.baseline_bits,
            gamma: alloc.gamma,
            criteria: Arc::new(Criteria::from_spec(&alloc.criteria)),
            analyzer: SensitivityAnalyzer::new(AnalyzerOptions::from(&config.analysis)),
            planner: AllocationPlanner::new(PlannerOptions::from(&config.planning))
                .with_estimator(estimator.clone()),
            estimator,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the configured criteria with a custom one.
    pub fn with_criteria(mut self, criteria: impl EvaluationCriteria + 'static) -> Self {
        self.criteria = Arc::new(criteria);
        self
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Search space for `baseline`. An empty component list means every
    /// component of the baseline.
    pub fn search_space<N: NetworkModel>(&self, baseline: &N) -> SearchSpace {
        let components = if self.components.is_empty() {
            baseline.components()
        } else {
            self.components.clone()
        };
        SearchSpace::new(components, self.candidates.clone(), self.baseline_bits)
    }

    /// Run the full pipeline against `baseline`.
    pub fn run<N, E>(&self, baseline: &N, evaluator: &E) -> Result<AllocationReport<N>>
    where
        N: NetworkModel,
        E: Evaluator<N> + ?Sized,
    {
        let start = Instant::now();
        let space = self.search_space(baseline);
        space.validate(baseline)?;
        let baseline_size = self.estimator.size(baseline)?;

        let analysis = self.analyzer.analyze(
            baseline,
            &space,
            self.criteria.as_ref(),
            evaluator,
            &self.cancel,
        )?;

        let outcome = self.planner.plan(
            baseline,
            &analysis.records,
            self.baseline_bits,
            self.gamma,
            evaluator,
            &self.cancel,
        )?;

        let quantized_performance = evaluate_guarded(
            evaluator,
            &outcome.network,
            self.planner.options().eval_timeout,
            &self.cancel,
        )
        .map_err(|e| BitmixError::from_eval(e, Phase::Reporting, None, None))?;
        let quantized_size = self.estimator.size(&outcome.network)?;

        let report = AllocationReport {
            baseline: baseline.snapshot(),
            network: outcome.network,
            gamma: self.gamma,
            baseline_performance: outcome.baseline_performance,
            quantized_performance,
            baseline_size,
            quantized_size,
            analysis,
            steps: outcome.steps,
            stopped_at: outcome.stopped_at,
        };
        info!(
            baseline_size,
            quantized_size,
            compression_ratio = report.compression_ratio(),
            quantized_performance,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Allocation complete"
        );
        Ok(report)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct AllocationReport<N> {
    pub baseline: PrecisionMap,
    pub network: N,
    pub gamma: f64,
    pub baseline_performance: f64,
    pub quantized_performance: f64,
    pub baseline_size: u64,
    pub quantized_size: u64,
    pub analysis: SensitivityAnalysis,
    pub steps: Vec<PlanStep>,
    pub stopped_at: Option<usize>,
}

/// Serializable view of an [`AllocationReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub baseline: PrecisionMap,
    pub allocation: PrecisionMap,
    pub gamma: f64,
    pub baseline_performance: f64,
    pub quantized_performance: f64,
    pub baseline_size: u64,
    pub quantized_size: u64,
    pub compression_ratio: f64,
    pub analysis: SensitivityAnalysis,
    pub steps: Vec<PlanStep>,
    pub stopped_at: Option<usize>,
}

impl<N: NetworkModel> AllocationReport<N> {
    /// `baseline_size / quantized_size`; `1.0` for an empty network.
    pub fn compression_ratio(&self) -> f64 {
        if self.quantized_size == 0 {
            1.0
        } else {
            self.baseline_size as f64 / self.quantized_size as f64
        }
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            baseline: self.baseline.clone(),
            allocation: self.network.snapshot(),
            gamma: self.gamma,
            baseline_performance: self.baseline_performance,
            quantized_performance: self.quantized_performance,
            baseline_size: self.baseline_size,
            quantized_size: self.quantized_size,
            compression_ratio: self.compression_ratio(),
            analysis: self.analysis.clone(),
            steps: self.steps.clone(),
            stopped_at: self.stopped_at,
        }
    }

    /// Format as ASCII tables.
    pub fn to_table(&self) -> String {
        let allocation = self.network.snapshot();
        let width = self
            .baseline
            .component_ids()
            .map(|id| id.as_str().chars().count())
            .max()
            .unwrap_or(0)
            .max("Component".len());
        let bar = "─".repeat(width + 2);

        let mut out = String::from("Bit-width Allocation\n");
        let _ = writeln!(out, "┌{bar}┬──────────┬──────────┐");
        let _ = writeln!(out, "│ {:<width$} │ Baseline │ Final    │", "Component");
        let _ = writeln!(out, "├{bar}┼──────────┼──────────┤");
        for (id, before) in self.baseline.iter() {
            let after = allocation.get(id).unwrap_or(before);
            let marker = if after != before { " *" } else { "  " };
            let _ = writeln!(
                out,
                "│ {:<width$} │ {:>8} │ {:>6}{marker} │",
                id.as_str(),
                before.to_string(),
                after.to_string(),
            );
        }
        let _ = writeln!(out, "└{bar}┴──────────┴──────────┘");

        if !self.steps.is_empty() {
            out.push_str("\nAllocation Walk\n");
            let _ = writeln!(out, "┌──────┬{bar}┬──────┬─────────────┬──────────┐");
            let _ = writeln!(
                out,
                "│ Rank │ {:<width$} │ Bits │ Performance │ Result   │",
                "Component"
            );
            let _ = writeln!(out, "├──────┼{bar}┼──────┼─────────────┼──────────┤");
            for (rank, step) in self.steps.iter().enumerate() {
                let result = if step.accepted { "accepted" } else { "reverted" };
                let _ = writeln!(
                    out,
                    "│ {:>4} │ {:<width$} │ {:>4} │ {:>11.4} │ {result} │",
                    rank,
                    step.component.as_str(),
                    step.bit_width.to_string(),
                    step.performance,
                );
            }
            let _ = writeln!(out, "└──────┴{bar}┴──────┴─────────────┴──────────┘");
        }

        let _ = writeln!(
            out,
            "\nPerformance: {:.4} -> {:.4} (gamma={:.4})",
            self.baseline_performance, self.quantized_performance, self.gamma
        );
        let _ = writeln!(
            out,
            "Size: {} -> {} ({:.2}x)",
            self.baseline_size,
            self.quantized_size,
            self.compression_ratio()
        );
        if !self.analysis.skipped.is_empty() {
            let _ = writeln!(out, "Skipped probes: {}", self.analysis.skipped.len());
        }
        if let Some(rank) = self.stopped_at {
            let _ = writeln!(out, "Stopped at rank {rank}: budget violated");
        }
        out
    }
}
