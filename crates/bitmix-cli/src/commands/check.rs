//! `bitmix check`: validate a run file and preview the search space without
//! probing anything.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use bitmix_alloc::{
    CancellationToken, MixedPrecisionAllocator, SizeEstimator, evaluate_guarded,
};
use bitmix_common::{BitmixError, Phase};

use crate::run_file::RunFile;

/// Validate a run file and show what an allocation would explore
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub components: usize,
    pub considered: usize,
    pub probes: usize,
    pub baseline_size: u64,
    pub baseline_performance: f64,
    pub gamma: f64,
}

impl CheckCommand {
    pub fn execute(&self, run: &RunFile) -> Result<()> {
        let summary = check(run)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
            );
        } else {
            println!("Run file OK");
            println!("  components:           {}", summary.components);
            println!("  considered:           {}", summary.considered);
            println!("  probes:               {}", summary.probes);
            println!("  baseline size:        {}", summary.baseline_size);
            println!("  baseline performance: {:.4}", summary.baseline_performance);
            println!("  gamma:                {:.4}", summary.gamma);
            if summary.baseline_performance < summary.gamma {
                println!("  warning: baseline is already below gamma");
            }
        }
        Ok(())
    }
}

/// Validate the search space and evaluate the baseline once.
pub fn check(run: &RunFile) -> Result<CheckSummary> {
    let allocator = MixedPrecisionAllocator::from_config(&run.config)?;
    let space = allocator.search_space(&run.network);
    space.validate(&run.network)?;

    let estimator = SizeEstimator::from_spec(&run.config.allocation.cost_model);
    let baseline_size = estimator.size(&run.network)?;

    let evaluator = run.evaluator()?;
    let baseline_performance = evaluate_guarded(
        &evaluator,
        &run.network,
        run.config.planning.eval_timeout(),
        &CancellationToken::new(),
    )
    .map_err(|e| BitmixError::from_eval(e, Phase::Validation, None, None))?;

    Ok(CheckSummary {
        components: run.network.len(),
        considered: space.components.len(),
        probes: space.probes().len(),
        baseline_size,
        baseline_performance,
        gamma: allocator.gamma(),
    })
}
