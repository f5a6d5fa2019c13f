use std::collections::BTreeMap;

use super::dimension::{DimensionKey, DimensionSet, NormalizationMethod, ThresholdBands};
use super::domain::UnitId;
use super::gap_fill::FilledValue;

/// Score assigned when a dimension has no discriminative signal.
pub const NEUTRAL_SCORE: f64 = 50.0;
pub const POOR_SCORE: f64 = 25.0;
pub const AVERAGE_SCORE: f64 = 50.0;
pub const GOOD_SCORE: f64 = 70.0;
pub const EXCELLENT_SCORE: f64 = 90.0;

/// Standard deviations on each side of the mean spanned by the z-score scale.
const Z_SCORE_SPAN: f64 = 3.0;

pub fn min_max(raw: f64, min: f64, max: f64) -> f64 {
    if max == min {
        return NEUTRAL_SCORE;
    }
    (100.0 * (raw - min) / (max - min)).clamp(0.0, 100.0)
}

pub fn z_score(raw: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        return NEUTRAL_SCORE;
    }
    let z = (raw - mean) / std_dev;
    (NEUTRAL_SCORE + z * (NEUTRAL_SCORE / Z_SCORE_SPAN)).clamp(0.0, 100.0)
}

/// Piecewise-linear mapping through the band boundaries.
pub fn threshold_bucket(raw: f64, bands: &ThresholdBands) -> f64 {
    let anchors = [
        (bands.poor, POOR_SCORE),
        (bands.average, AVERAGE_SCORE),
        (bands.good, GOOD_SCORE),
        (bands.excellent, EXCELLENT_SCORE),
    ];

    if raw <= anchors[0].0 {
        return POOR_SCORE;
    }
    for pair in anchors.windows(2) {
        let (low, low_score) = pair[0];
        let (high, high_score) = pair[1];
        if raw <= high {
            let fraction = (raw - low) / (high - low);
            return low_score + fraction * (high_score - low_score);
        }
    }
    EXCELLENT_SCORE
}

/// Distribution of the reference values for one dimension in a period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub sample: usize,
}

impl ReferenceStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sample = values.len();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / sample as f64;
        let variance = values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / sample as f64;
        Some(Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
            sample,
        })
    }
}

/// One unit's completed inputs, as seen by the normalizer.
pub struct NormalizationInput<'a> {
    pub unit_id: &'a UnitId,
    pub values: &'a BTreeMap<DimensionKey, FilledValue>,
    /// Low-confidence units do not contribute to the reference distribution.
    pub excluded: bool,
}

/// Normalize every active dimension across the full cross-unit set of a period.
///
/// The reference distribution uses observed values of non-excluded units. When that is
/// empty it widens to every value present, so a period where nobody passes the
/// completeness cutoff still gets a best-effort spread.
pub fn normalize_period(
    dimensions: &DimensionSet,
    units: &[NormalizationInput<'_>],
) -> BTreeMap<UnitId, BTreeMap<DimensionKey, f64>> {
    let mut normalized: BTreeMap<UnitId, BTreeMap<DimensionKey, f64>> = units
        .iter()
        .map(|unit| (unit.unit_id.clone(), BTreeMap::new()))
        .collect();

    for dimension in dimensions.active() {
        let reference: Vec<f64> = units
            .iter()
            .filter(|unit| !unit.excluded)
            .filter_map(|unit| unit.values.get(&dimension.key))
            .filter(|value| !value.provenance.is_estimated())
            .map(|value| value.raw)
            .collect();
        let stats = ReferenceStats::from_values(&reference).or_else(|| {
            let everything: Vec<f64> = units
                .iter()
                .filter_map(|unit| unit.values.get(&dimension.key))
                .map(|value| value.raw)
                .collect();
            ReferenceStats::from_values(&everything)
        });

        for unit in units {
            let Some(value) = unit.values.get(&dimension.key) else {
                continue;
            };
            let score = match (dimension.normalization, stats) {
                (NormalizationMethod::ThresholdBucket, _) => dimension
                    .bands
                    .map(|bands| threshold_bucket(value.raw, &bands))
                    .unwrap_or(NEUTRAL_SCORE),
                (NormalizationMethod::MinMax, Some(stats)) => {
                    min_max(value.raw, stats.min, stats.max)
                }
                (NormalizationMethod::ZScore, Some(stats)) => {
                    z_score(value.raw, stats.mean, stats.std_dev)
                }
                (_, None) => NEUTRAL_SCORE,
            };
            if let Some(scores) = normalized.get_mut(unit.unit_id) {
                scores.insert(dimension.key.clone(), score);
            }
        }
    }

    normalized
}
