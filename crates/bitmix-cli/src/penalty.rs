//! Synthetic evaluator driven by the `[evaluator]` section of a run file.
//!
//! The score of a network is
//! `base - Σ weight(c) · deficit(c)² - cliff_penalty · pairs_below_min_bits`
//! where `deficit(c)` is how many bits component `c` sits below
//! `reference_bits`. The pairwise cliff models components that tolerate low
//! precision alone but not together.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bitmix_alloc::{EvalContext, Evaluator};
use bitmix_common::{
    AllocationConfig, BitWidth, BitmixError, ComponentId, EvalError, PrecisionMap, Result,
};

const LATENCY_SLICE: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    /// Score of a network with no deficit.
    pub base: f64,
    pub reference_bits: BitWidth,
    /// Weight for components without an entry in `weights`.
    pub default_weight: f64,
    pub weights: BTreeMap<ComponentId, f64>,
    /// Components strictly below this width count toward the cliff.
    pub min_bits: Option<BitWidth>,
    pub cliff_penalty: f64,
    /// Simulated cost of one evaluation.
    pub latency_ms: u64,
    /// Components whose evaluation fails whenever they leave `reference_bits`.
    pub unstable: Vec<ComponentId>,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base: 1.0,
            reference_bits: AllocationConfig::default().baseline_bits,
            default_weight: 0.002,
            weights: BTreeMap::new(),
            min_bits: None,
            cliff_penalty: 0.25,
            latency_ms: 0,
            unstable: Vec::new(),
        }
    }
}

impl PenaltyConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.base.is_finite() || !self.default_weight.is_finite() || !self.cliff_penalty.is_finite() {
            return Err(BitmixError::invalid_config("evaluator parameters must be finite"));
        }
        if let Some((id, w)) = self.weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(BitmixError::invalid_config(format!(
                "evaluator weight for '{id}' must be a non-negative number, got {w}"
            )));
        }
        if self.default_weight < 0.0 || self.cliff_penalty < 0.0 {
            return Err(BitmixError::invalid_config("evaluator penalties must be non-negative"));
        }
        Ok(())
    }
}

/// [`Evaluator`] over [`PrecisionMap`] built from a [`PenaltyConfig`].
#[derive(Debug, Clone)]
pub struct PenaltyEvaluator {
    config: PenaltyConfig,
}

impl PenaltyEvaluator {
    pub fn new(config: PenaltyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PenaltyConfig {
        &self.config
    }

    /// Score without latency or failure injection.
    pub fn score(&self, network: &PrecisionMap) -> f64 {
        let cfg = &self.config;
        let reference = f64::from(cfg.reference_bits.bits());
        let mut below_min = 0usize;

        let deficit_penalty: f64 = network
            .iter()
            .map(|(id, bits)| {
                if cfg.min_bits.is_some_and(|min| bits < min) {
                    below_min += 1;
                }
                let deficit = (reference - f64::from(bits.bits())).max(0.0);
                let weight = cfg.weights.get(id).copied().unwrap_or(cfg.default_weight);
                weight * deficit * deficit
            })
            .sum();

        let pairs = below_min * below_min.saturating_sub(1) / 2;
        cfg.base - deficit_penalty - cfg.cliff_penalty * pairs as f64
    }

    fn simulate_latency(&self, ctx: &EvalContext) -> std::result::Result<(), EvalError> {
        let mut remaining = Duration::from_millis(self.config.latency_ms);
        while !remaining.is_zero() {
            ctx.check()?;
            let slice = remaining.min(LATENCY_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
        Ok(())
    }
}

impl Evaluator<PrecisionMap> for PenaltyEvaluator {
    fn evaluate(&self, network: &PrecisionMap, ctx: &EvalContext) -> std::result::Result<f64, EvalError> {
        self.simulate_latency(ctx)?;
        if let Some(id) = self
            .config
            .unstable
            .iter()
            .find(|id| network.get(id).is_some_and(|bits| bits != self.config.reference_bits))
        {
            return Err(EvalError::failed(format!("'{id}' diverged away from reference precision")));
        }
        Ok(self.score(network))
    }
}
