//! Configuration types and utilities

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BitmixError, Result};
use crate::types::{BitWidth, ComponentId};


/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "BITMIX_";

/// Main bitmix configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitmixConfig {
    pub allocation: AllocationConfig,
    pub analysis: AnalysisConfig,
    pub planning: PlanningConfig,
    pub logging: LoggingConfig,
}

/// What to allocate and against which budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Components to consider. Empty means every component of the baseline network.
    pub components: Vec<ComponentId>,
    /// Candidate bit-widths, in the order probes are generated.
    pub candidates: Vec<BitWidth>,
    /// Reference precision; must be one of `candidates`.
    pub baseline_bits: BitWidth,
    /// Minimum acceptable performance (gamma).
    pub gamma: f64,
    pub criteria: CriteriaSpec,
    pub cost_model: CostModelSpec,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            candidates: vec![BitWidth::from_raw(2), BitWidth::from_raw(4), BitWidth::from_raw(8)],
            baseline_bits: BitWidth::from_raw(8),
            gamma: 0.8,
            criteria: CriteriaSpec::Identity,
            cost_model: CostModelSpec::BitSum,
        }
    }
}

/// Sensitivity phase settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrent probes. `0` means one per available CPU.
    pub max_concurrency: usize,
    /// Per-evaluation deadline in milliseconds.
    pub eval_timeout_ms: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { failure_policy: FailurePolicy::Skip, max_concurrency: 1, eval_timeout_ms: None }
    }
}

impl AnalysisConfig {
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_ms.map(Duration::from_millis)
    }
}

/// Allocation walk settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    pub violation_policy: ViolationPolicy,
    pub ranking: RankingStrategy,
    /// Per-evaluation deadline in milliseconds.
    pub eval_timeout_ms: Option<u64>,
}

impl PlanningConfig {
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_ms.map(Duration::from_millis)
    }
}

/// Logging settings consumed by the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One of `pretty`, `compact`, `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// What the analyzer does when a probe cannot be evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the probe as unevaluable and keep going.
    #[default]
    Skip,
    /// Fail the whole analysis on the first unevaluable probe.
    Abort,
}

/// What the planner does after a step drops performance below gamma.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Revert the violating component and end the walk.
    #[default]
    Stop,
    /// Revert the violating component and try the next record.
    SkipAndContinue,
}

/// Order in which the planner commits sensitivity records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Score descending, ties in first-appearance order.
    #[default]
    Sensitivity,
    /// Score descending, ties broken by larger size reduction, then first appearance.
    CostAware,
}

/// Scalar transform from raw performance to a comparable score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriteriaSpec {
    #[default]
    Identity,
    /// `-performance`, for loss-like metrics.
    Negate,
    /// `scale * performance + offset`.
    Affine { scale: f64, offset: f64 },
    /// `performance - reference`.
    Delta { reference: f64 },
}

/// Cost model used for size reporting and cost-aware ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostModelSpec {
    /// Sum of bit-widths.
    #[default]
    BitSum,
    /// Sum of bit-width times element count.
    ElementWeighted { elements: BTreeMap<ComponentId, u64> },
}

macro_rules! impl_policy_from_str {
    ($ty:ty, $what:literal, { $($($name:literal)|+ => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = BitmixError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                    $($($name)|+ => Ok($variant),)+
                    other => Err(BitmixError::invalid_config(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

impl_policy_from_str!(FailurePolicy, "failure policy", {
    "skip" => FailurePolicy::Skip,
    "abort" => FailurePolicy::Abort,
});

impl_policy_from_str!(ViolationPolicy, "violation policy", {
    "stop" => ViolationPolicy::Stop,
    "skip_and_continue" | "continue" => ViolationPolicy::SkipAndContinue,
});

impl_policy_from_str!(RankingStrategy, "ranking strategy", {
    "sensitivity" => RankingStrategy::Sensitivity,
    "cost_aware" => RankingStrategy::CostAware,
});

impl BitmixConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load from a TOML or JSON file, chosen by extension (TOML when unknown).
    pub fn from_file(path: &Path) -> Result<Self> {
        read_document(path)
    }

    /// Apply every recognised `BITMIX_*` variable on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(gamma) = env_parse::<f64>("GAMMA")? {
            self.allocation.gamma = gamma;
        }
        if let Some(bits) = env_parse::<u8>("BASELINE_BITS")? {
            self.allocation.baseline_bits = BitWidth::new(bits)?;
        }
        if let Some(raw) = env_var("CANDIDATES") {
            self.allocation.candidates = parse_candidates(&raw)?;
        }
        if let Some(n) = env_parse::<usize>("MAX_CONCURRENCY")? {
            self.analysis.max_concurrency = n;
        }
        if let Some(ms) = env_parse::<u64>("EVAL_TIMEOUT_MS")? {
            self.analysis.eval_timeout_ms = Some(ms);
            self.planning.eval_timeout_ms = Some(ms);
        }
        if let Some(policy) = env_parse::<FailurePolicy>("FAILURE_POLICY")? {
            self.analysis.failure_policy = policy;
        }
        if let Some(policy) = env_parse::<ViolationPolicy>("VIOLATION_POLICY")? {
            self.planning.violation_policy = policy;
        }
        if let Some(ranking) = env_parse::<RankingStrategy>("RANKING")? {
            self.planning.ranking = ranking;
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        let alloc = &self.allocation;

        if alloc.candidates.is_empty() {
            return Err(BitmixError::invalid_config("candidate bit-widths must not be empty"));
        }
        let mut seen = HashSet::new();
        for bw in &alloc.candidates {
            if !seen.insert(*bw) {
                return Err(BitmixError::invalid_config(format!(
                    "duplicate candidate bit-width {bw}"
                )));
            }
        }
        if !alloc.candidates.contains(&alloc.baseline_bits) {
            return Err(BitmixError::invalid_config(format!(
                "baseline bit-width {} is not among the candidates",
                alloc.baseline_bits
            )));
        }
        let mut seen_components = HashSet::new();
        for id in &alloc.components {
            if !seen_components.insert(id) {
                return Err(BitmixError::invalid_config(format!("duplicate component '{id}'")));
            }
        }
        if !alloc.gamma.is_finite() {
            return Err(BitmixError::invalid_config("gamma must be a finite number"));
        }
        match alloc.criteria {
            CriteriaSpec::Affine { scale, offset } if !scale.is_finite() || !offset.is_finite() => {
                return Err(BitmixError::invalid_config(
                    "affine criteria requires finite scale and offset",
                ));
            }
            CriteriaSpec::Delta { reference } if !reference.is_finite() => {
                return Err(BitmixError::invalid_config("delta criteria requires a finite reference"));
            }
            _ => {}
        }
        if self.analysis.eval_timeout_ms == Some(0) || self.planning.eval_timeout_ms == Some(0) {
            return Err(BitmixError::invalid_config("eval_timeout_ms must be greater than 0"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(BitmixError::invalid_config(format!(
                "unknown log format '{}' (expected pretty, compact or json)",
                self.logging.format
            )));
        }
        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}")).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(suffix) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            BitmixError::invalid_config(format!("{ENV_PREFIX}{suffix}='{raw}': {e}"))
        }),
    }
}

/// Deserialize any document from a TOML or JSON file, chosen by extension
/// (TOML when unknown). Read and parse failures are [`BitmixError::Config`].
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let config_err = |reason: String| BitmixError::Config { path: path.to_path_buf(), reason };
    let content = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| config_err(e.to_string()))
    } else {
        toml::from_str(&content).map_err(|e| config_err(e.to_string()))
    }
}

/// Parse a comma-separated list such as `"2,4,8"`.
pub fn parse_candidates(raw: &str) -> Result<Vec<BitWidth>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let bits = s.parse::<u8>().map_err(|e| {
                BitmixError::invalid_config(format!("bad candidate bit-width '{s}': {e}"))
            })?;
            BitWidth::new(bits)
        })
        .collect()
}

/// Fluent builder for [`BitmixConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: BitmixConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components<I, C>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        self.config.allocation.components = components.into_iter().map(Into::into).collect();
        self
    }

    pub fn candidates(mut self, candidates: Vec<BitWidth>) -> Self {
        self.config.allocation.candidates = candidates;
        self
    }

    pub fn baseline_bits(mut self, bits: BitWidth) -> Self {
        self.config.allocation.baseline_bits = bits;
        self
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.config.allocation.gamma = gamma;
        self
    }

    pub fn criteria(mut self, criteria: CriteriaSpec) -> Self {
        self.config.allocation.criteria = criteria;
        self
    }

    pub fn cost_model(mut self, cost_model: CostModelSpec) -> Self {
        self.config.allocation.cost_model = cost_model;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.analysis.failure_policy = policy;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.analysis.max_concurrency = n;
        self
    }

    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.config.planning.violation_policy = policy;
        self
    }

    pub fn ranking(mut self, ranking: RankingStrategy) -> Self {
        self.config.planning.ranking = ranking;
        self
    }

    /// Same deadline for both phases.
    pub fn eval_timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.config.analysis.eval_timeout_ms = Some(ms);
        self.config.planning.eval_timeout_ms = Some(ms);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Result<BitmixConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
