//! Per-component sensitivity analysis.
//!
//! Every (component, non-baseline candidate) pair is probed independently:
//! the baseline is cloned, only that component is changed, the clone is
//! evaluated and the criteria score is recorded. Probes never observe each
//! other's mutations, so they can run on a bounded worker pool; the output
//! order is always component order, then candidate order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use bitmix_common::{
    AnalysisConfig, BitWidth, BitmixError, ComponentId, ErrorKind, EvalError, FailurePolicy,
    Phase, Result,
};

use crate::criteria::EvaluationCriteria;
use crate::evaluator::{CancellationToken, Evaluator, evaluate_guarded};
use crate::network::NetworkModel;
use crate::space::SearchSpace;

/// Score of one independent probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityRecord {
    pub component: ComponentId,
    pub bit_width: BitWidth,
    pub score: f64,
}

/// A probe that could not be evaluated and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedProbe {
    pub component: ComponentId,
    pub bit_width: BitWidth,
    pub timed_out: bool,
    pub reason: String,
}

/// Output of [`SensitivityAnalyzer::analyze`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensitivityAnalysis {
    pub records: Vec<SensitivityRecord>,
    pub skipped: Vec<SkippedProbe>,
}

impl SensitivityAnalysis {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Knobs for [`SensitivityAnalyzer`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOptions {
    /// Under [`FailurePolicy::Abort`] the run fails with the earliest error in
    /// component then candidate order, whatever the concurrency.
    pub failure_policy: FailurePolicy,
    /// Concurrent probes; `0` resolves to the number of CPUs, `1` runs inline.
    pub max_concurrency: usize,
    pub eval_timeout: Option<Duration>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self { failure_policy: FailurePolicy::Skip, max_concurrency: 1, eval_timeout: None }
    }
}

impl From<&AnalysisConfig> for AnalyzerOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            failure_policy: config.failure_policy,
            max_concurrency: config.max_concurrency,
            eval_timeout: config.eval_timeout(),
        }
    }
}

/// Measures each component's sensitivity to reduced precision, in isolation.
#[derive(Debug, Clone, Default)]
pub struct SensitivityAnalyzer {
    options: AnalyzerOptions,
}

impl SensitivityAnalyzer {
    pub fn new(options: AnalyzerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    fn worker_count(&self) -> usize {
        match self.options.max_concurrency {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    /// Probe every (component, non-baseline candidate) pair of `space`.
    ///
    /// A candidate menu containing only the baseline yields an empty analysis.
    /// Unevaluable probes are skipped or abort the run per the failure policy;
    /// cancellation always aborts.
    pub fn analyze<N, E, C>(
        &self,
        baseline: &N,
        space: &SearchSpace,
        criteria: &C,
        evaluator: &E,
        cancel: &CancellationToken,
    ) -> Result<SensitivityAnalysis>
    where
        N: NetworkModel,
        E: Evaluator<N> + ?Sized,
        C: EvaluationCriteria + ?Sized,
    {
        space.validate(baseline)?;

        let probes = space.probes();
        let workers = self.worker_count().min(probes.len().max(1));
        info!(
            probes = probes.len(),
            components = space.components.len(),
            workers,
            "Starting sensitivity analysis"
        );
        let start = Instant::now();

        // Lowest index that failed fatally. Only later entries are abandoned,
        // so the reported error is the earliest one in component order.
        let first_fatal = AtomicUsize::new(usize::MAX);
        let abort_on_failure = self.options.failure_policy == FailurePolicy::Abort;
        let timeout = self.options.eval_timeout;

        // `None` marks a probe abandoned after an abort; it never carries an outcome.
        let run_probe = |(idx, (component, bits)): (usize, &(ComponentId, BitWidth))| {
            if idx > first_fatal.load(Ordering::Acquire) {
                return None;
            }
            let outcome = probe_one(baseline, component, *bits, criteria, evaluator, timeout, cancel);
            let fatal = match &outcome {
                Err(EvalError::Cancelled) => true,
                Err(_) => abort_on_failure,
                Ok(_) => false,
            };
            if fatal {
                first_fatal.fetch_min(idx, Ordering::AcqRel);
            }
            Some(outcome)
        };

        let outcomes: Vec<Option<ProbeOutcome>> = if workers <= 1 {
            probes.iter().enumerate().map(run_probe).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|idx| format!("bitmix-probe-{idx}"))
                .build()
                .map_err(|e| BitmixError::ThreadPool(e.to_string()))?;
            pool.install(|| probes.par_iter().enumerate().map(run_probe).collect())
        };

        let mut analysis = SensitivityAnalysis::default();
        for ((component, bits), outcome) in probes.into_iter().zip(outcomes) {
            let Some(outcome) = outcome else { continue };
            match outcome {
                Ok(score) => {
                    debug!(%component, %bits, score, "Recorded sensitivity");
                    analysis.records.push(SensitivityRecord { component, bit_width: bits, score });
                }
                Err(err) => {
                    let err = BitmixError::from_eval(
                        err,
                        Phase::Sensitivity,
                        Some(component.clone()),
                        Some(bits),
                    );
                    if abort_on_failure || err.kind() == ErrorKind::Cancelled {
                        return Err(err);
                    }
                    warn!(%component, %bits, error = %err, "Skipping unevaluable probe");
                    analysis.skipped.push(SkippedProbe {
                        component,
                        bit_width: bits,
                        timed_out: err.kind() == ErrorKind::EvaluationTimeout,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            recorded = analysis.records.len(),
            skipped = analysis.skipped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sensitivity analysis complete"
        );
        Ok(analysis)
    }
}

type ProbeOutcome = std::result::Result<f64, EvalError>;

fn probe_one<N, E, C>(
    baseline: &N,
    component: &ComponentId,
    bits: BitWidth,
    criteria: &C,
    evaluator: &E,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> ProbeOutcome
where
    N: NetworkModel,
    E: Evaluator<N> + ?Sized,
    C: EvaluationCriteria + ?Sized,
{
    let probe = baseline
        .with_bit_width(component, bits)
        .map_err(|e| EvalError::failed(e.to_string()))?;
    let performance = evaluate_guarded(evaluator, &probe, timeout, cancel)?;
    let score = criteria.score(performance);
    if !score.is_finite() {
        return Err(EvalError::NonFinite(score));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Criteria;
    use crate::evaluator::evaluator_fn;
    use bitmix_common::PrecisionMap;
    use std::sync::Mutex;

    fn bw(bits: u8) -> BitWidth {
        BitWidth::new(bits).unwrap()
    }

    fn two_layer_space() -> (PrecisionMap, SearchSpace) {
        let net = PrecisionMap::uniform(["a", "b"], bw(8));
        let space = SearchSpace::new(vec!["a".into(), "b".into()], vec![bw(2), bw(4), bw(8)], bw(8));
        (net, space)
    }

    /// 1.0 at all-8, 0.9 with exactly one component at 4, 0.5 once anything is at 2.
    fn step_eval(net: &PrecisionMap) -> std::result::Result<f64, EvalError> {
        let bits: Vec<u8> = net.iter().map(|(_, b)| b.bits()).collect();
        if bits.contains(&2) {
            Ok(0.5)
        } else if bits.iter().filter(|&&b| b == 4).count() == 1 {
            Ok(0.9)
        } else if bits.iter().all(|&b| b == 8) {
            Ok(1.0)
        } else {
            Ok(0.7)
        }
    }

    #[test]
    fn test_records_follow_probe_order() {
        let (net, space) = two_layer_space();
        let analysis = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &evaluator_fn(step_eval), &CancellationToken::new())
            .unwrap();

        let got: Vec<_> = analysis
            .records
            .iter()
            .map(|r| (r.component.to_string(), r.bit_width.bits(), r.score))
            .collect();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), 2, 0.5),
                ("a".to_string(), 4, 0.9),
                ("b".to_string(), 2, 0.5),
                ("b".to_string(), 4, 0.9),
            ]
        );
        assert!(analysis.skipped.is_empty());
    }

    #[test]
    fn test_probes_see_only_their_own_change() {
        let (net, space) = two_layer_space();
        let seen = Mutex::new(Vec::new());
        let eval = evaluator_fn(|n: &PrecisionMap| {
            seen.lock().unwrap().push(n.clone());
            Ok(1.0)
        });
        SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap();

        for probe in seen.into_inner().unwrap() {
            assert_eq!(probe.diff(&net).len(), 1, "probe {probe} changed more than one component");
        }
    }

    #[test]
    fn test_baseline_only_menu_is_empty_not_error() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let space = SearchSpace::new(vec!["a".into()], vec![bw(8)], bw(8));
        let eval = evaluator_fn(|_: &PrecisionMap| -> std::result::Result<f64, EvalError> {
            panic!("no probe should be evaluated")
        });
        let analysis = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap();
        assert!(analysis.is_empty());
    }

    #[test]
    fn test_skip_policy_logs_and_continues() {
        let (net, space) = two_layer_space();
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"a".into()) == Some(bw(2)) {
                Err(EvalError::failed("kernel missing"))
            } else {
                Ok(0.8)
            }
        });
        let analysis = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap();

        assert_eq!(analysis.records.len(), 3);
        assert_eq!(analysis.skipped.len(), 1);
        assert_eq!(analysis.skipped[0].component.as_str(), "a");
        assert_eq!(analysis.skipped[0].bit_width, bw(2));
        assert!(!analysis.skipped[0].timed_out);
        assert!(analysis.skipped[0].reason.contains("kernel missing"));
    }

    #[test]
    fn test_abort_policy_fails_on_first_error() {
        let (net, space) = two_layer_space();
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"b".into()) == Some(bw(2)) { Ok(f64::NAN) } else { Ok(0.8) }
        });
        let analyzer = SensitivityAnalyzer::new(AnalyzerOptions {
            failure_policy: FailurePolicy::Abort,
            ..AnalyzerOptions::default()
        });
        let err = analyzer
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EvaluationFailure);
        assert_eq!(err.phase(), Some(Phase::Sensitivity));
        assert_eq!(err.component().map(ComponentId::as_str), Some("b"));
    }

    #[test]
    fn test_parallel_abort_reports_earliest_error_in_order() {
        let (net, space) = two_layer_space();
        // "a"@2 fails late, "b"@2 fails at once; "a"@2 comes first in order.
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"a".into()) == Some(bw(2)) {
                std::thread::sleep(Duration::from_millis(30));
                Err(EvalError::failed("slow failure"))
            } else if n.get(&"b".into()) == Some(bw(2)) {
                Err(EvalError::failed("fast failure"))
            } else {
                Ok(0.8)
            }
        });
        let analyzer = SensitivityAnalyzer::new(AnalyzerOptions {
            failure_policy: FailurePolicy::Abort,
            max_concurrency: 4,
            ..AnalyzerOptions::default()
        });
        let err = analyzer
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.component().map(ComponentId::as_str), Some("a"));
        assert!(err.to_string().contains("slow failure"));
    }

    /// Sleeps well past a 10ms deadline when "a" sits at 2 bits.
    fn slow_on_a2(n: &PrecisionMap) -> std::result::Result<f64, EvalError> {
        if n.get(&"a".into()) == Some(bw(2)) {
            std::thread::sleep(Duration::from_millis(40));
        }
        Ok(0.8)
    }

    #[test]
    fn test_timed_out_probe_is_skipped_and_flagged() {
        let (net, space) = two_layer_space();
        let analyzer = SensitivityAnalyzer::new(AnalyzerOptions {
            eval_timeout: Some(Duration::from_millis(10)),
            ..AnalyzerOptions::default()
        });
        let analysis = analyzer
            .analyze(&net, &space, &Criteria::Identity, &evaluator_fn(slow_on_a2), &CancellationToken::new())
            .unwrap();

        assert_eq!(analysis.records.len(), 3);
        assert_eq!(analysis.skipped.len(), 1);
        let skipped = &analysis.skipped[0];
        assert_eq!(skipped.component.as_str(), "a");
        assert_eq!(skipped.bit_width, bw(2));
        assert!(skipped.timed_out);
    }

    #[test]
    fn test_timeout_under_abort_policy_keeps_timeout_kind() {
        let (net, space) = two_layer_space();
        let analyzer = SensitivityAnalyzer::new(AnalyzerOptions {
            failure_policy: FailurePolicy::Abort,
            eval_timeout: Some(Duration::from_millis(10)),
            ..AnalyzerOptions::default()
        });
        let err = analyzer
            .analyze(&net, &space, &Criteria::Identity, &evaluator_fn(slow_on_a2), &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EvaluationTimeout);
        assert_eq!(err.phase(), Some(Phase::Sensitivity));
        assert_eq!(err.component().map(ComponentId::as_str), Some("a"));
    }

    #[test]
    fn test_non_finite_criteria_score_is_skipped() {
        let (net, space) = two_layer_space();
        let log_criteria = crate::criteria::criteria_fn(f64::ln);
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"a".into()) == Some(bw(4)) { Ok(0.0) } else { Ok(0.5) }
        });
        let analysis = SensitivityAnalyzer::default()
            .analyze(&net, &space, &log_criteria, &eval, &CancellationToken::new())
            .unwrap();
        assert_eq!(analysis.records.len(), 3);
        assert_eq!(analysis.skipped.len(), 1);
    }

    #[test]
    fn test_cancellation_aborts_regardless_of_policy() {
        let (net, space) = two_layer_space();
        let token = CancellationToken::new();
        token.cancel();
        let err = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &evaluator_fn(step_eval), &token)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let components: Vec<String> = (0..12).map(|i| format!("layer.{i}")).collect();
        let net = PrecisionMap::uniform(components.iter().map(String::as_str), bw(8));
        let space = SearchSpace::new(
            components.iter().map(|c| ComponentId::from(c.as_str())).collect(),
            vec![bw(2), bw(3), bw(4), bw(8)],
            bw(8),
        );
        // Deterministic, component-dependent score.
        let eval = evaluator_fn(|n: &PrecisionMap| {
            Ok(n.iter()
                .enumerate()
                .map(|(i, (_, b))| (i as f64 + 1.0) * f64::from(b.bits()))
                .sum::<f64>())
        });

        let sequential = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap();
        let parallel = SensitivityAnalyzer::new(AnalyzerOptions {
            max_concurrency: 4,
            ..AnalyzerOptions::default()
        })
        .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
        .unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(parallel.records.len(), 36);
    }

    #[test]
    fn test_invalid_space_fails_before_evaluating() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let space = SearchSpace::new(vec!["a".into()], vec![bw(2), bw(4)], bw(8));
        let eval = evaluator_fn(|_: &PrecisionMap| -> std::result::Result<f64, EvalError> {
            panic!("validation must run first")
        });
        let err = SensitivityAnalyzer::default()
            .analyze(&net, &space, &Criteria::Identity, &eval, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
