use std::collections::BTreeMap;

use super::dimension::{DimensionKey, DimensionSet};
use super::registry::RegistryError;

/// Round to four decimals so equal scores compare exactly during ranking.
pub fn round_score(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Weighted sum of normalized dimension scores.
#[derive(Debug, Clone, Copy)]
pub struct ScoreComposer<'a> {
    dimensions: &'a DimensionSet,
}

impl<'a> ScoreComposer<'a> {
    /// Fails fast when the active weights do not sum to one.
    pub fn new(dimensions: &'a DimensionSet) -> Result<Self, RegistryError> {
        dimensions.validate_weights()?;
        Ok(Self { dimensions })
    }

    pub fn compose(&self, normalized: &BTreeMap<DimensionKey, f64>) -> f64 {
        let overall: f64 = self
            .dimensions
            .active()
            .map(|dimension| {
                dimension.weight * normalized.get(&dimension.key).copied().unwrap_or(0.0)
            })
            .sum();
        round_score(overall.clamp(0.0, 100.0))
    }
}
