//! The search space of an allocation run and its fail-fast validation.

use std::collections::HashSet;

use bitmix_common::{BitWidth, BitmixError, ComponentId, Result};

use crate::network::NetworkModel;

/// Components to consider, the candidate menu, and the reference precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    pub components: Vec<ComponentId>,
    pub candidates: Vec<BitWidth>,
    pub baseline_bits: BitWidth,
}

impl SearchSpace {
    pub fn new(
        components: Vec<ComponentId>,
        candidates: Vec<BitWidth>,
        baseline_bits: BitWidth,
    ) -> Self {
        Self { components, candidates, baseline_bits }
    }

    /// Candidates that differ from the baseline, in menu order.
    pub fn probe_bits(&self) -> impl Iterator<Item = BitWidth> + '_ {
        self.candidates.iter().copied().filter(move |&bw| bw != self.baseline_bits)
    }

    /// Every (component, bit-width) pair to probe: component order, then menu order.
    pub fn probes(&self) -> Vec<(ComponentId, BitWidth)> {
        self.components
            .iter()
            .flat_map(|id| self.probe_bits().map(move |bw| (id.clone(), bw)))
            .collect()
    }

    /// Check the space against the baseline network before any evaluation.
    ///
    /// Every listed component must exist in `baseline` and hold exactly
    /// `baseline_bits`, so components the walk never reaches stay at baseline.
    pub fn validate<N: NetworkModel>(&self, baseline: &N) -> Result<()> {
        if self.components.is_empty() {
            return Err(BitmixError::invalid_config("component set must not be empty"));
        }
        if self.candidates.is_empty() {
            return Err(BitmixError::invalid_config("candidate bit-widths must not be empty"));
        }

        let mut seen_bits = HashSet::new();
        for bw in &self.candidates {
            if !seen_bits.insert(*bw) {
                return Err(BitmixError::invalid_config(format!(
                    "duplicate candidate bit-width {bw}"
                )));
            }
        }
        if !seen_bits.contains(&self.baseline_bits) {
            return Err(BitmixError::invalid_config(format!(
                "baseline bit-width {} is not among the candidates",
                self.baseline_bits
            )));
        }

        let mut seen_components = HashSet::new();
        for id in &self.components {
            if !seen_components.insert(id) {
                return Err(BitmixError::invalid_config(format!("duplicate component '{id}'")));
            }
            match baseline.bit_width(id) {
                None => {
                    return Err(BitmixError::invalid_config(format!(
                        "component '{id}' is not present in the baseline network"
                    )));
                }
                Some(bw) if bw != self.baseline_bits => {
                    return Err(BitmixError::invalid_config(format!(
                        "component '{id}' holds {bw} in the baseline network, expected {}",
                        self.baseline_bits
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
