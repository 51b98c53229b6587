//! Network model abstraction.

use bitmix_common::{BitWidth, BitmixError, ComponentId, PrecisionMap, Result};

/// A network whose quantizable components each carry a bit-width.
///
/// Implementations must be deep-cloneable: a clone shares no mutable state
/// with its source, so independent probes can each own one.
pub trait NetworkModel: Clone + Send + Sync {
    /// Current bit-width of `id`, or `None` if the component is unknown.
    fn bit_width(&self, id: &ComponentId) -> Option<BitWidth>;

    /// Set the bit-width of an existing component in place.
    ///
    /// Unknown components are rejected with [`BitmixError::MissingComponent`];
    /// this never adds entries.
    fn set_bit_width(&mut self, id: &ComponentId, bits: BitWidth) -> Result<()>;

    /// Every component that carries a bit-width, in a stable order.
    fn components(&self) -> Vec<ComponentId>;

    /// Clone, then set one component. The receiver is left untouched.
    fn with_bit_width(&self, id: &ComponentId, bits: BitWidth) -> Result<Self> {
        let mut probe = self.clone();
        probe.set_bit_width(id, bits)?;
        Ok(probe)
    }

    /// Plain component → bit-width view, used for reporting and diagnostics.
    fn snapshot(&self) -> PrecisionMap {
        self.components()
            .into_iter()
            .filter_map(|id| self.bit_width(&id).map(|bw| (id, bw)))
            .collect()
    }
}

impl NetworkModel for PrecisionMap {
    fn bit_width(&self, id: &ComponentId) -> Option<BitWidth> {
        self.get(id)
    }

    fn set_bit_width(&mut self, id: &ComponentId, bits: BitWidth) -> Result<()> {
        if !self.contains(id) {
            return Err(BitmixError::MissingComponent(id.clone()));
        }
        self.insert(id.clone(), bits);
        Ok(())
    }

    fn components(&self) -> Vec<ComponentId> {
        self.component_ids().cloned().collect()
    }

    fn snapshot(&self) -> PrecisionMap {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bw(bits: u8) -> BitWidth {
        BitWidth::new(bits).unwrap()
    }

    #[test]
    fn test_with_bit_width_leaves_source_untouched() {
        let base = PrecisionMap::uniform(["a", "b"], bw(8));
        let probe = base.with_bit_width(&"a".into(), bw(2)).unwrap();

        assert_eq!(base.bit_width(&"a".into()), Some(bw(8)));
        assert_eq!(probe.bit_width(&"a".into()), Some(bw(2)));
        assert_eq!(probe.bit_width(&"b".into()), Some(bw(8)));
    }

    #[test]
    fn test_set_unknown_component_is_rejected() {
        let mut net = PrecisionMap::uniform(["a"], bw(8));
        let err = net.set_bit_width(&"ghost".into(), bw(4)).unwrap_err();
        assert!(matches!(err, BitmixError::MissingComponent(ref id) if id.as_str() == "ghost"));
        assert_eq!(net.len(), 1);
    }

    #[test]
    fn test_components_are_sorted() {
        let net = PrecisionMap::uniform(["z", "m", "a"], bw(8));
        let ids: Vec<_> = net.components().into_iter().map(|c| c.to_string()).collect();
        assert_eq!(ids, ["a", "m", "z"]);
    }
}
