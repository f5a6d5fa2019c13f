use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::registry::RegistryError;

/// Tolerance applied when checking that active weights sum to one.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Identifier wrapper for index dimensions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionKey(pub String);

impl DimensionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduction applied to the records of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Count,
    Rate,
    Average,
}

/// How the aggregated sources of a dimension combine into one raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    #[default]
    Sum,
    Mean,
    Max,
}

impl Formula {
    pub fn combine(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Formula::Sum => values.iter().sum(),
            Formula::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Formula::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Mapping of a named operational source onto a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub source: String,
    pub aggregation: AggregationMethod,
}

impl SourceMapping {
    pub fn new(source: impl Into<String>, aggregation: AggregationMethod) -> Self {
        Self {
            source: source.into(),
            aggregation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    MinMax,
    ZScore,
    ThresholdBucket,
}

/// Lower boundaries of each quality band on the raw scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBands {
    pub excellent: f64,
    pub good: f64,
    pub average: f64,
    pub poor: f64,
}

impl ThresholdBands {
    pub fn is_ascending(&self) -> bool {
        let ordered = [self.poor, self.average, self.good, self.excellent];
        ordered.iter().all(|value| value.is_finite())
            && ordered.windows(2).all(|pair| pair[0] < pair[1])
    }
}

fn default_active() -> bool {
    true
}

/// One weighted axis of the composite index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub key: DimensionKey,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub formula: Formula,
    pub sources: Vec<SourceMapping>,
    pub normalization: NormalizationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands: Option<ThresholdBands>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub version: u32,
}

/// Validated, immutable snapshot of the dimension configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionSet {
    version: u32,
    dimensions: Vec<Dimension>,
}

/// Serialized form of a dimension set, as read from configuration files.
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionSetDocument {
    pub version: u32,
    pub dimensions: Vec<Dimension>,
}

impl TryFrom<DimensionSetDocument> for DimensionSet {
    type Error = RegistryError;

    fn try_from(document: DimensionSetDocument) -> Result<Self, Self::Error> {
        DimensionSet::new(document.version, document.dimensions)
    }
}

impl DimensionSet {
    /// Validate and stamp a list of dimensions with `version`.
    pub fn new(version: u32, mut dimensions: Vec<Dimension>) -> Result<Self, RegistryError> {
        let mut keys = BTreeSet::new();
        for dimension in &mut dimensions {
            if !keys.insert(dimension.key.clone()) {
                return Err(RegistryError::DuplicateKey(dimension.key.clone()));
            }
            dimension.version = version;
        }

        let set = Self {
            version,
            dimensions,
        };

        if set.active().next().is_none() {
            return Err(RegistryError::NoActiveDimensions);
        }

        for dimension in set.active() {
            if !(0.0..=1.0).contains(&dimension.weight) || !dimension.weight.is_finite() {
                return Err(RegistryError::WeightOutOfRange {
                    key: dimension.key.clone(),
                    weight: dimension.weight,
                });
            }
            if dimension.sources.is_empty() {
                return Err(RegistryError::MissingSources(dimension.key.clone()));
            }
            if dimension.normalization == NormalizationMethod::ThresholdBucket
                && !dimension
                    .bands
                    .map(|bands| bands.is_ascending())
                    .unwrap_or(false)
            {
                return Err(RegistryError::InvalidBands(dimension.key.clone()));
            }
        }

        set.validate_weights()?;
        Ok(set)
    }

    /// Default five-dimension configuration covering the operational record families.
    pub fn standard() -> Self {
        let dimension = |key: &str,
                         name: &str,
                         weight: f64,
                         formula: Formula,
                         sources: Vec<SourceMapping>,
                         normalization: NormalizationMethod,
                         bands: Option<ThresholdBands>| Dimension {
            key: DimensionKey::new(key),
            name: name.to_string(),
            weight,
            formula,
            sources,
            normalization,
            bands,
            active: true,
            version: 1,
        };

        Self {
            version: 1,
            dimensions: vec![
                dimension(
                    "challenge_activity",
                    "Challenge activity",
                    0.25,
                    Formula::Sum,
                    vec![SourceMapping::new("challenges", AggregationMethod::Count)],
                    NormalizationMethod::MinMax,
                    None,
                ),
                dimension(
                    "pilot_performance",
                    "Pilot performance",
                    0.25,
                    Formula::Sum,
                    vec![SourceMapping::new("pilots", AggregationMethod::Rate)],
                    NormalizationMethod::ThresholdBucket,
                    Some(ThresholdBands {
                        excellent: 0.8,
                        good: 0.6,
                        average: 0.4,
                        poor: 0.2,
                    }),
                ),
                dimension(
                    "partnership_health",
                    "Partnership health",
                    0.2,
                    Formula::Sum,
                    vec![SourceMapping::new("partnerships", AggregationMethod::Average)],
                    NormalizationMethod::ZScore,
                    None,
                ),
                dimension(
                    "digital_adoption",
                    "Digital service adoption",
                    0.2,
                    Formula::Sum,
                    vec![SourceMapping::new(
                        "digital_services",
                        AggregationMethod::Rate,
                    )],
                    NormalizationMethod::MinMax,
                    None,
                ),
                dimension(
                    "innovation_capacity",
                    "Innovation capacity",
                    0.1,
                    Formula::Sum,
                    vec![
                        SourceMapping::new("innovation_staff", AggregationMethod::Count),
                        SourceMapping::new("training_sessions", AggregationMethod::Count),
                    ],
                    NormalizationMethod::MinMax,
                    None,
                ),
            ],
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn active(&self) -> impl Iterator<Item = &Dimension> + '_ {
        self.dimensions.iter().filter(|dimension| dimension.active)
    }

    pub fn get(&self, key: &DimensionKey) -> Option<&Dimension> {
        self.active().find(|dimension| &dimension.key == key)
    }

    pub fn weight_sum(&self) -> f64 {
        self.active().map(|dimension| dimension.weight).sum()
    }

    pub fn validate_weights(&self) -> Result<(), RegistryError> {
        let sum = self.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(RegistryError::WeightSumMismatch { sum });
        }
        Ok(())
    }

    /// Distinct source names referenced by active dimensions.
    pub fn sources(&self) -> BTreeSet<&str> {
        self.active()
            .flat_map(|dimension| dimension.sources.iter())
            .map(|mapping| mapping.source.as_str())
            .collect()
    }
}
