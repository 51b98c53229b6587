//! Greedy, budget-constrained bit-width allocation.
//!
//! The planner walks sensitivity records from highest score to lowest and
//! commits each one to a single working network. Changes are cumulative:
//! every evaluation sees all previously accepted changes. A change that drops
//! performance below gamma is reverted to the baseline bit-width, and the walk
//! either stops there or moves on, per [`ViolationPolicy`].
//!
//! The walk is strictly sequential; each step depends on the state left by
//! the steps before it.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use bitmix_common::{
    BitWidth, BitmixError, ComponentId, Phase, PlanningConfig, RankingStrategy, Result,
    ViolationPolicy,
};

use crate::evaluator::{CancellationToken, Evaluator, evaluate_guarded};
use crate::network::NetworkModel;
use crate::sensitivity::SensitivityRecord;
use crate::size::SizeEstimator;

/// One evaluated step of the walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub component: ComponentId,
    pub bit_width: BitWidth,
    pub performance: f64,
    pub accepted: bool,
}

/// Result of a completed walk.
#[derive(Debug, Clone)]
pub struct PlanOutcome<N> {
    /// Final allocation.
    pub network: N,
    /// Performance of the untouched baseline, measured once before any change.
    pub baseline_performance: f64,
    pub steps: Vec<PlanStep>,
    /// Rank of the record whose violation ended the walk, if one did.
    pub stopped_at: Option<usize>,
}

impl<N> PlanOutcome<N> {
    pub fn accepted(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| !s.accepted)
    }
}

/// Knobs for [`AllocationPlanner`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerOptions {
    pub violation_policy: ViolationPolicy,
    pub ranking: RankingStrategy,
    pub eval_timeout: Option<Duration>,
}

impl From<&PlanningConfig> for PlannerOptions {
    fn from(config: &PlanningConfig) -> Self {
        Self {
            violation_policy: config.violation_policy,
            ranking: config.ranking,
            eval_timeout: config.eval_timeout(),
        }
    }
}

/// Commits sensitivity records to a working network under a performance budget.
#[derive(Debug, Clone, Default)]
pub struct AllocationPlanner {
    options: PlannerOptions,
    estimator: SizeEstimator,
}

impl AllocationPlanner {
    pub fn new(options: PlannerOptions) -> Self {
        Self { options, estimator: SizeEstimator::default() }
    }

    /// Cost model consulted by [`RankingStrategy::CostAware`].
    pub fn with_estimator(mut self, estimator: SizeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Order `records` for the walk.
    ///
    /// Score descending; equal scores keep first-appearance order. Under
    /// [`RankingStrategy::CostAware`] equal scores are first ordered by the
    /// larger size reduction against `baseline`.
    pub fn rank<N: NetworkModel>(
        &self,
        baseline: &N,
        records: &[SensitivityRecord],
    ) -> Result<Vec<SensitivityRecord>> {
        let mut ranked: Vec<SensitivityRecord> = records.to_vec();
        match self.options.ranking {
            RankingStrategy::Sensitivity => {
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            }
            RankingStrategy::CostAware => {
                let mut keyed = ranked
                    .into_iter()
                    .map(|r| {
                        let saved = self.estimator.reduction(baseline, &r.component, r.bit_width)?;
                        Ok((saved, r))
                    })
                    .collect::<Result<Vec<_>>>()?;
                keyed.sort_by(|(sa, a), (sb, b)| match b.score.total_cmp(&a.score) {
                    Ordering::Equal => sb.cmp(sa),
                    other => other,
                });
                ranked = keyed.into_iter().map(|(_, r)| r).collect();
            }
        }
        Ok(ranked)
    }

    /// Walk the ranked records against `gamma`.
    ///
    /// Any evaluation error aborts the walk with
    /// [`BitmixError::PlannerAborted`], carrying the working network as it
    /// was when the failure happened. Errors are never read as a violation.
    pub fn plan<N, E>(
        &self,
        baseline: &N,
        records: &[SensitivityRecord],
        baseline_bits: BitWidth,
        gamma: f64,
        evaluator: &E,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome<N>>
    where
        N: NetworkModel,
        E: Evaluator<N> + ?Sized,
    {
        if !gamma.is_finite() {
            return Err(BitmixError::invalid_config("gamma must be a finite number"));
        }
        let ranked = self.rank(baseline, records)?;
        let timeout = self.options.eval_timeout;

        let baseline_performance =
            evaluate_guarded(evaluator, baseline, timeout, cancel).map_err(|e| {
                BitmixError::PlannerAborted {
                    partial: baseline.snapshot(),
                    source: Box::new(BitmixError::from_eval(e, Phase::Planning, None, None)),
                }
            })?;
        info!(
            baseline_performance,
            gamma,
            records = ranked.len(),
            "Starting allocation walk"
        );

        let mut working = baseline.clone();
        let mut steps = Vec::with_capacity(ranked.len());
        let mut stopped_at = None;

        for (rank, record) in ranked.iter().enumerate() {
            let SensitivityRecord { component, bit_width, .. } = record;
            working.set_bit_width(component, *bit_width)?;

            let performance = match evaluate_guarded(evaluator, &working, timeout, cancel) {
                Ok(p) => p,
                Err(e) => {
                    return Err(BitmixError::PlannerAborted {
                        partial: working.snapshot(),
                        source: Box::new(BitmixError::from_eval(
                            e,
                            Phase::Planning,
                            Some(component.clone()),
                            Some(*bit_width),
                        )),
                    });
                }
            };

            let accepted = performance >= gamma;
            steps.push(PlanStep {
                component: component.clone(),
                bit_width: *bit_width,
                performance,
                accepted,
            });

            if accepted {
                debug!(rank, %component, %bit_width, performance, "Accepted");
                continue;
            }

            working.set_bit_width(component, baseline_bits)?;
            debug!(rank, %component, %bit_width, performance, gamma, "Budget violated, reverted");
            if self.options.violation_policy == ViolationPolicy::Stop {
                stopped_at = Some(rank);
                break;
            }
        }

        let outcome = PlanOutcome { network: working, baseline_performance, steps, stopped_at };
        info!(
            accepted = outcome.accepted().count(),
            rejected = outcome.rejected().count(),
            stopped_at = ?outcome.stopped_at,
            "Allocation walk complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluator_fn;
    use bitmix_common::{ErrorKind, EvalError, PrecisionMap};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn bw(bits: u8) -> BitWidth {
        BitWidth::new(bits).unwrap()
    }

    fn rec(component: &str, bits: u8, score: f64) -> SensitivityRecord {
        SensitivityRecord { component: component.into(), bit_width: bw(bits), score }
    }

    /// Each component below 8 bits costs 0.1, each at 2 bits costs 0.3 more.
    fn additive_eval(net: &PrecisionMap) -> std::result::Result<f64, EvalError> {
        Ok(net.iter().fold(1.0, |acc, (_, b)| match b.bits() {
            8 => acc,
            2 => acc - 0.4,
            _ => acc - 0.1,
        }))
    }

    #[test]
    fn test_rank_is_stable_descending() {
        let records = vec![rec("a", 2, 0.5), rec("a", 4, 0.9), rec("b", 2, 0.5), rec("b", 4, 0.9)];
        let net = PrecisionMap::uniform(["a", "b"], bw(8));
        let ranked = AllocationPlanner::default().rank(&net, &records).unwrap();
        assert_eq!(ranked, vec![records[1].clone(), records[3].clone(), records[0].clone(), records[2].clone()]);
    }

    #[test]
    fn test_cost_aware_breaks_ties_by_savings() {
        let records = vec![rec("small", 4, 0.9), rec("big", 4, 0.9), rec("big", 2, 0.95)];
        let net = PrecisionMap::uniform(["small", "big"], bw(8));
        let planner = AllocationPlanner::new(PlannerOptions {
            ranking: RankingStrategy::CostAware,
            ..PlannerOptions::default()
        })
        .with_estimator(SizeEstimator::element_weighted(BTreeMap::from([
            ("small".into(), 10),
            ("big".into(), 1000),
        ])));

        let ranked = planner.rank(&net, &records).unwrap();
        let order: Vec<_> = ranked.iter().map(|r| (r.component.to_string(), r.bit_width.bits())).collect();
        assert_eq!(
            order,
            vec![("big".to_string(), 2), ("big".to_string(), 4), ("small".to_string(), 4)]
        );
    }

    #[test]
    fn test_walk_accumulates_changes() {
        let net = PrecisionMap::uniform(["a", "b", "c"], bw(8));
        let records = vec![rec("a", 4, 0.9), rec("b", 4, 0.8), rec("c", 4, 0.7)];
        let seen = Mutex::new(Vec::new());
        let eval = evaluator_fn(|n: &PrecisionMap| {
            seen.lock().unwrap().push(n.clone());
            additive_eval(n)
        });

        let outcome = AllocationPlanner::default()
            .plan(&net, &records, bw(8), 0.5, &eval, &CancellationToken::new())
            .unwrap();

        // baseline + three cumulative steps
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        for (k, snapshot) in seen.iter().enumerate() {
            let reduced = snapshot.iter().filter(|(_, b)| b.bits() == 4).count();
            assert_eq!(reduced, k, "evaluation {k} should see {k} accepted changes");
        }
        assert!(outcome.network.iter().all(|(_, b)| b == bw(4)));
        assert_eq!(outcome.baseline_performance, 1.0);
        assert_eq!(outcome.stopped_at, None);
    }

    #[test]
    fn test_stop_reverts_violator_and_ends_walk() {
        let net = PrecisionMap::uniform(["a", "b", "c"], bw(8));
        let records = vec![rec("a", 4, 0.9), rec("b", 2, 0.6), rec("c", 4, 0.5)];
        let outcome = AllocationPlanner::default()
            .plan(&net, &records, bw(8), 0.75, &evaluator_fn(additive_eval), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.network.get(&"a".into()), Some(bw(4)));
        assert_eq!(outcome.network.get(&"b".into()), Some(bw(8)));
        assert_eq!(outcome.network.get(&"c".into()), Some(bw(8)));
        assert_eq!(outcome.steps.len(), 2);
        assert!(!outcome.steps[1].accepted);
        assert_eq!(outcome.stopped_at, Some(1));
    }

    #[test]
    fn test_skip_and_continue_tries_remaining_records() {
        let net = PrecisionMap::uniform(["a", "b", "c"], bw(8));
        let records = vec![rec("a", 4, 0.9), rec("b", 2, 0.6), rec("c", 4, 0.5)];
        let planner = AllocationPlanner::new(PlannerOptions {
            violation_policy: ViolationPolicy::SkipAndContinue,
            ..PlannerOptions::default()
        });
        let outcome = planner
            .plan(&net, &records, bw(8), 0.75, &evaluator_fn(additive_eval), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.network.get(&"a".into()), Some(bw(4)));
        assert_eq!(outcome.network.get(&"b".into()), Some(bw(8)));
        assert_eq!(outcome.network.get(&"c".into()), Some(bw(4)));
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.stopped_at, None);
    }

    #[test]
    fn test_no_records_returns_baseline() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let outcome = AllocationPlanner::default()
            .plan(&net, &[], bw(8), 0.9, &evaluator_fn(additive_eval), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.network, net);
        assert_eq!(outcome.baseline_performance, 1.0);
        assert!(outcome.steps.is_empty());
    }

    #[test]
    fn test_mid_walk_failure_aborts_with_partial_network() {
        let net = PrecisionMap::uniform(["a", "b"], bw(8));
        let records = vec![rec("a", 4, 0.9), rec("b", 4, 0.8)];
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"b".into()) == Some(bw(4)) {
                Err(EvalError::failed("out of memory"))
            } else {
                additive_eval(n)
            }
        });

        let err = AllocationPlanner::default()
            .plan(&net, &records, bw(8), 0.1, &eval, &CancellationToken::new())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EvaluationFailure);
        assert_eq!(err.phase(), Some(Phase::Planning));
        assert_eq!(err.component().map(ComponentId::as_str), Some("b"));
        let partial = err.partial_network().unwrap();
        assert_eq!(partial.get(&"a".into()), Some(bw(4)));
        assert_eq!(partial.get(&"b".into()), Some(bw(4)));
    }

    #[test]
    fn test_baseline_evaluation_failure_is_fatal() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let eval = evaluator_fn(|_: &PrecisionMap| Ok(f64::INFINITY));
        let err = AllocationPlanner::default()
            .plan(&net, &[rec("a", 4, 1.0)], bw(8), 0.5, &eval, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationFailure);
        assert_eq!(err.partial_network(), Some(&net));
    }

    #[test]
    fn test_timeout_mid_walk_keeps_timeout_kind() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let eval = evaluator_fn(|n: &PrecisionMap| {
            if n.get(&"a".into()) == Some(bw(4)) {
                std::thread::sleep(Duration::from_millis(40));
            }
            Ok(1.0)
        });
        let planner = AllocationPlanner::new(PlannerOptions {
            eval_timeout: Some(Duration::from_millis(10)),
            ..PlannerOptions::default()
        });
        let err = planner
            .plan(&net, &[rec("a", 4, 1.0)], bw(8), 0.5, &eval, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationTimeout);
    }

    #[test]
    fn test_non_finite_gamma_is_rejected() {
        let net = PrecisionMap::uniform(["a"], bw(8));
        let err = AllocationPlanner::default()
            .plan(&net, &[], bw(8), f64::NAN, &evaluator_fn(additive_eval), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
