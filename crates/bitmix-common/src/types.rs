//! Core vocabulary shared by every bitmix crate

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BitmixError, Result};

/// Identifier of a quantizable component (e.g. one layer's weight tensor).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Numeric precision, in bits, assigned to a component.
///
/// Always within `1..=BitWidth::MAX_BITS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BitWidth(u8);

impl BitWidth {
    /// Widest precision accepted.
    pub const MAX_BITS: u8 = 32;

    /// Create a bit-width, rejecting zero and anything wider than [`Self::MAX_BITS`].
    pub fn new(bits: u8) -> Result<Self> {
        if bits == 0 || bits > Self::MAX_BITS {
            return Err(BitmixError::invalid_config(format!(
                "bit-width must be in 1..={}, got {bits}",
                Self::MAX_BITS
            )));
        }
        Ok(Self(bits))
    }

    /// In-crate constructor for literals already known to be in range.
    pub(crate) const fn from_raw(bits: u8) -> Self {
        debug_assert!(bits != 0 && bits <= Self::MAX_BITS);
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for BitWidth {
    type Error = BitmixError;

    fn try_from(bits: u8) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<BitWidth> for u8 {
    fn from(bw: BitWidth) -> Self {
        bw.0
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}b", self.0)
    }
}

/// Stage of an allocation run. Used to scope errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Configuration checks before any evaluation.
    Validation,
    /// Independent per-(component, bit-width) probes.
    Sensitivity,
    /// Cumulative greedy walk over the ranked probes.
    Planning,
    /// Post-allocation metrics (quantized performance, sizes).
    Reporting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validation => "validation",
            Phase::Sensitivity => "sensitivity",
            Phase::Planning => "planning",
            Phase::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Component → bit-width mapping with deterministic iteration order.
///
/// This is the concrete network representation used by the CLI and the
/// snapshot type carried by [`BitmixError::PlannerAborted`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecisionMap {
    entries: BTreeMap<ComponentId, BitWidth>,
}

impl PrecisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map where every listed component holds `bits`.
    pub fn uniform<I, C>(components: I, bits: BitWidth) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ComponentId>,
    {
        components.into_iter().map(|c| (c.into(), bits)).collect()
    }

    pub fn get(&self, id: &ComponentId) -> Option<BitWidth> {
        self.entries.get(id).copied()
    }

    /// Insert or overwrite an entry, returning the previous bit-width.
    pub fn insert(&mut self, id: ComponentId, bits: BitWidth) -> Option<BitWidth> {
        self.entries.insert(id, bits)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, BitWidth)> {
        self.entries.iter().map(|(id, bw)| (id, *bw))
    }

    pub fn component_ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.entries.keys()
    }

    /// Components whose bit-width differs between `self` and `other`.
    pub fn diff<'a>(&'a self, other: &'a PrecisionMap) -> Vec<(&'a ComponentId, BitWidth, BitWidth)> {
        self.entries
            .iter()
            .filter_map(|(id, &bw)| match other.get(id) {
                Some(theirs) if theirs != bw => Some((id, bw, theirs)),
                _ => None,
            })
            .collect()
    }
}

impl FromIterator<(ComponentId, BitWidth)> for PrecisionMap {
    fn from_iter<T: IntoIterator<Item = (ComponentId, BitWidth)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl fmt::Display for PrecisionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (id, bw)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}: {}", bw.bits())?;
        }
        f.write_str("}")
    }
}
