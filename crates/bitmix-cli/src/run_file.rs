//! Run files: a baseline network, a synthetic evaluator and the allocation
//! settings in one TOML or JSON document.
//!
//! ```toml
//! [network]
//! "blk.0.attn" = 8
//! "blk.0.ffn" = 8
//!
//! [evaluator]
//! default_weight = 0.002
//! weights = { "blk.0.attn" = 0.02 }
//!
//! [allocation]
//! candidates = [2, 4, 8]
//! gamma = 0.9
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use bitmix_common::{BitmixConfig, PrecisionMap, read_document};

use crate::penalty::{PenaltyConfig, PenaltyEvaluator};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    /// Baseline network: component → bit-width.
    pub network: PrecisionMap,
    #[serde(default)]
    pub evaluator: PenaltyConfig,
    #[serde(flatten)]
    pub config: BitmixConfig,
}

impl RunFile {
    /// Parse a run file, apply `BITMIX_*` overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut run: RunFile = read_document(path)
            .with_context(|| format!("Failed to load run file {}", path.display()))?;

        run.config
            .apply_env_overrides()
            .context("Failed to apply environment overrides")?;
        run.validate()?;
        Ok(run)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.is_empty() {
            bail!("run file declares no [network] components");
        }
        self.config.validate().context("Invalid allocation settings")?;
        self.evaluator.validate().context("Invalid [evaluator] section")?;
        Ok(())
    }

    pub fn evaluator(&self) -> Result<PenaltyEvaluator> {
        Ok(PenaltyEvaluator::new(self.evaluator.clone())?)
    }
}
