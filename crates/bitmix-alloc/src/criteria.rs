//! Evaluation criteria: raw performance → comparable sensitivity score.

use bitmix_common::CriteriaSpec;

/// Monotonic scalar transform applied to every probe's performance.
pub trait EvaluationCriteria: Send + Sync {
    fn score(&self, performance: f64) -> f64;
}

/// Built-in criteria, constructible from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Criteria {
    #[default]
    Identity,
    /// For loss-like metrics where lower raw values are better.
    Negate,
    Affine { scale: f64, offset: f64 },
    /// Signed delta from a reference performance.
    Delta { reference: f64 },
}

impl Criteria {
    pub fn from_spec(spec: &CriteriaSpec) -> Self {
        match *spec {
            CriteriaSpec::Identity => Criteria::Identity,
            CriteriaSpec::Negate => Criteria::Negate,
            CriteriaSpec::Affine { scale, offset } => Criteria::Affine { scale, offset },
            CriteriaSpec::Delta { reference } => Criteria::Delta { reference },
        }
    }
}

impl EvaluationCriteria for Criteria {
    fn score(&self, performance: f64) -> f64 {
        match *self {
            Criteria::Identity => performance,
            Criteria::Negate => -performance,
            Criteria::Affine { scale, offset } => scale * performance + offset,
            Criteria::Delta { reference } => performance - reference,
        }
    }
}

/// Adapter turning a closure into [`EvaluationCriteria`].
#[derive(Clone)]
pub struct FnCriteria<F>(F);

pub fn criteria_fn<F>(f: F) -> FnCriteria<F>
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    FnCriteria(f)
}

impl<F> EvaluationCriteria for FnCriteria<F>
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn score(&self, performance: f64) -> f64 {
        (self.0)(performance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_criteria() {
        assert_eq!(Criteria::Identity.score(0.9), 0.9);
        assert_eq!(Criteria::Negate.score(2.5), -2.5);
        assert_eq!(Criteria::Affine { scale: 2.0, offset: 1.0 }.score(0.5), 2.0);
        assert!((Criteria::Delta { reference: 0.9 }.score(0.85) + 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_from_spec_round_trips_parameters() {
        let spec = CriteriaSpec::Affine { scale: 3.0, offset: -0.5 };
        assert_eq!(Criteria::from_spec(&spec), Criteria::Affine { scale: 3.0, offset: -0.5 });
        assert_eq!(Criteria::from_spec(&CriteriaSpec::default()), Criteria::Identity);
    }

    #[test]
    fn test_closure_criteria() {
        let squared = criteria_fn(|p| p * p);
        assert_eq!(squared.score(3.0), 9.0);
    }
}
