use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::domain::{Period, UnitId};

/// One raw operational record (a challenge, a pilot outcome, a partnership rating...).
///
/// `denominator` only matters for rate aggregation and defaults to one per record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub value: f64,
    #[serde(default)]
    pub denominator: Option<f64>,
}

impl SourceRecord {
    pub const fn value(value: f64) -> Self {
        Self {
            value,
            denominator: None,
        }
    }

    pub const fn ratio(value: f64, denominator: f64) -> Self {
        Self {
            value,
            denominator: Some(denominator),
        }
    }
}

/// Failures reported by the operational record store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("source {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("source {name} returned invalid data: {reason}")]
    Invalid { name: String, reason: String },
}

/// Read access to raw operational records, keyed by unit, period and source name.
///
/// An empty vector means the source holds no data for the unit.
pub trait RecordStore: Send + Sync {
    fn fetch(
        &self,
        unit: &UnitId,
        period: Period,
        source: &str,
    ) -> Result<Vec<SourceRecord>, SourceError>;
}

type RecordKey = (UnitId, Period, String);

/// In-process record store used by the CLI, the demo dataset and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordKey, Vec<SourceRecord>>>,
    outages: RwLock<BTreeSet<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, unit: &UnitId, period: Period, source: &str, record: SourceRecord) {
        let mut records = self.records.write().expect("record store lock poisoned");
        records
            .entry((unit.clone(), period, source.to_string()))
            .or_default()
            .push(record);
    }

    /// Replace every record of one source for a unit and period.
    pub fn replace(
        &self,
        unit: &UnitId,
        period: Period,
        source: &str,
        replacement: Vec<SourceRecord>,
    ) {
        let mut records = self.records.write().expect("record store lock poisoned");
        records.insert((unit.clone(), period, source.to_string()), replacement);
    }

    /// Mark a source as unreachable until cleared.
    pub fn set_outage(&self, source: &str, down: bool) {
        let mut outages = self.outages.write().expect("record store lock poisoned");
        if down {
            outages.insert(source.to_string());
        } else {
            outages.remove(source);
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .expect("record store lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch(
        &self,
        unit: &UnitId,
        period: Period,
        source: &str,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        if self
            .outages
            .read()
            .expect("record store lock poisoned")
            .contains(source)
        {
            return Err(SourceError::Unavailable {
                name: source.to_string(),
                reason: "source marked offline".to_string(),
            });
        }

        let records = self.records.read().expect("record store lock poisoned");
        Ok(records
            .get(&(unit.clone(), period, source.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
