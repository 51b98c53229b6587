//! Evaluator abstraction with deadline and cancellation plumbing.
//!
//! An [`Evaluator`] scores a network snapshot. It is the only source of
//! variance in a run and usually the dominant cost (a full inference pass),
//! so every call goes through [`evaluate_guarded`], which enforces the
//! caller's deadline and cancellation and rejects non-comparable scores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bitmix_common::EvalError;

use crate::network::NetworkModel;

/// Scores a network snapshot. Must not mutate the network.
pub trait Evaluator<N: NetworkModel>: Send + Sync {
    /// Return a scalar performance where higher is better.
    ///
    /// Long-running implementations should poll [`EvalContext::check`] and
    /// bail out early when it fails.
    fn evaluate(&self, network: &N, ctx: &EvalContext) -> Result<f64, EvalError>;
}

/// Adapter turning a closure into an [`Evaluator`].
#[derive(Clone)]
pub struct FnEvaluator<F> {
    f: F,
}

/// Wrap a closure that ignores the [`EvalContext`].
pub fn evaluator_fn<N, F>(f: F) -> FnEvaluator<F>
where
    N: NetworkModel,
    F: Fn(&N) -> Result<f64, EvalError> + Send + Sync,
{
    FnEvaluator { f }
}

impl<N, F> Evaluator<N> for FnEvaluator<F>
where
    N: NetworkModel,
    F: Fn(&N) -> Result<f64, EvalError> + Send + Sync,
{
    fn evaluate(&self, network: &N, _ctx: &EvalContext) -> Result<f64, EvalError> {
        (self.f)(network)
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every evaluation holding this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-call context handed to [`Evaluator::evaluate`].
#[derive(Debug, Clone)]
pub struct EvalContext {
    started: Instant,
    limit: Option<Duration>,
    cancel: CancellationToken,
}

impl EvalContext {
    pub fn new(limit: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { started: Instant::now(), limit, cancel }
    }

    /// Context with no deadline and a fresh token.
    pub fn unbounded() -> Self {
        Self::new(None, CancellationToken::new())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail if the caller cancelled or the deadline has passed.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        if let Some(limit) = self.limit {
            let elapsed = self.elapsed();
            if elapsed > limit {
                return Err(EvalError::TimedOut { elapsed, limit });
            }
        }
        Ok(())
    }
}

/// Run one evaluation under `timeout` and `cancel`.
///
/// The deadline is re-checked after the evaluator returns, so an evaluator
/// that ignores the context still surfaces as [`EvalError::TimedOut`].
pub fn evaluate_guarded<N, E>(
    evaluator: &E,
    network: &N,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<f64, EvalError>
where
    N: NetworkModel,
    E: Evaluator<N> + ?Sized,
{
    let ctx = EvalContext::new(timeout, cancel.clone());
    ctx.check()?;
    let performance = evaluator.evaluate(network, &ctx)?;
    ctx.check()?;
    if !performance.is_finite() {
        return Err(EvalError::NonFinite(performance));
    }
    Ok(performance)
}
