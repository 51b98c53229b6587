//! Size estimation for network snapshots.
//!
//! The default cost model is the sum of bit-widths across components. It is a
//! placeholder: real deployments weight each component by its element count,
//! which [`CostModel::ElementWeighted`] provides.

use std::collections::BTreeMap;

use bitmix_common::{BitWidth, BitmixError, ComponentId, CostModelSpec, Result};

use crate::network::NetworkModel;

/// How a single component contributes to the network's size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CostModel {
    #[default]
    BitSum,
    ElementWeighted { elements: BTreeMap<ComponentId, u64> },
}

/// Computes aggregate cost of a network under a [`CostModel`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeEstimator {
    model: CostModel,
}

impl SizeEstimator {
    pub fn new(model: CostModel) -> Self {
        Self { model }
    }

    pub fn bit_sum() -> Self {
        Self::new(CostModel::BitSum)
    }

    pub fn element_weighted(elements: BTreeMap<ComponentId, u64>) -> Self {
        Self::new(CostModel::ElementWeighted { elements })
    }

    pub fn from_spec(spec: &CostModelSpec) -> Self {
        match spec {
            CostModelSpec::BitSum => Self::bit_sum(),
            CostModelSpec::ElementWeighted { elements } => Self::element_weighted(elements.clone()),
        }
    }

    pub fn model(&self) -> &CostModel {
        &self.model
    }

    /// Cost of one component at `bits`.
    pub fn component_cost(&self, id: &ComponentId, bits: BitWidth) -> Result<u64> {
        match &self.model {
            CostModel::BitSum => Ok(u64::from(bits.bits())),
            CostModel::ElementWeighted { elements } => elements
                .get(id)
                .map(|&n| n.saturating_mul(u64::from(bits.bits())))
                .ok_or_else(|| BitmixError::MissingComponent(id.clone())),
        }
    }

    /// Total cost of `network`.
    pub fn size<N: NetworkModel>(&self, network: &N) -> Result<u64> {
        network.components().iter().try_fold(0u64, |total, id| -> Result<u64> {
            let bits = network
                .bit_width(id)
                .ok_or_else(|| BitmixError::MissingComponent(id.clone()))?;
            Ok(total.saturating_add(self.component_cost(id, bits)?))
        })
    }

    /// Size saved by moving `id` from its current bit-width in `network` to `bits`.
    ///
    /// Negative when `bits` is wider than the current assignment.
    pub fn reduction<N: NetworkModel>(
        &self,
        network: &N,
        id: &ComponentId,
        bits: BitWidth,
    ) -> Result<i128> {
        let current = network
            .bit_width(id)
            .ok_or_else(|| BitmixError::MissingComponent(id.clone()))?;
        let before = i128::from(self.component_cost(id, current)?);
        let after = i128::from(self.component_cost(id, bits)?);
        Ok(before - after)
    }
}
