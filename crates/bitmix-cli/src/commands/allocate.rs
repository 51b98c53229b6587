//! `bitmix allocate`: run sensitivity analysis and planning, print the report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use bitmix_alloc::{AllocationReport, CancellationToken, MixedPrecisionAllocator};
use bitmix_common::PrecisionMap;

use crate::run_file::RunFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Allocate per-component bit-widths under the run file's budget
#[derive(Debug, Args)]
pub struct AllocateCommand {
    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Also write the JSON report to this path
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl AllocateCommand {
    pub fn execute(&self, run: &RunFile, cancel: &CancellationToken) -> Result<()> {
        let report = allocate(run, cancel)?;
        println!("{}", render(&report, self.format)?);

        if let Some(path) = &self.output {
            let json = render(&report, OutputFormat::Json)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        Ok(())
    }
}

/// Run the allocator over the run file's network with its penalty evaluator.
///
/// Cancelling `cancel` stops the run at the next evaluation boundary.
pub fn allocate(
    run: &RunFile,
    cancel: &CancellationToken,
) -> Result<AllocationReport<PrecisionMap>> {
    let evaluator = run.evaluator()?;
    let allocator = MixedPrecisionAllocator::from_config(&run.config)
        .context("Failed to configure allocator")?
        .with_cancellation(cancel.clone());
    info!(
        components = run.network.len(),
        gamma = allocator.gamma(),
        "Starting allocation"
    );
    let report = allocator.run(&run.network, &evaluator)?;
    Ok(report)
}

pub fn render(report: &AllocationReport<PrecisionMap>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(report.to_table()),
        OutputFormat::Json => serde_json::to_string_pretty(&report.summary())
            .context("Failed to serialize report"),
    }
}
