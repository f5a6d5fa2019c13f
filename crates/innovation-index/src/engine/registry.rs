use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};

use tracing::info;

use super::dimension::{Dimension, DimensionKey, DimensionSet};
use super::domain::Period;

/// Configuration and locking failures raised by the dimension registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("no active dimensions configured")]
    NoActiveDimensions,
    #[error("dimension {0} is defined more than once")]
    DuplicateKey(DimensionKey),
    #[error("dimension {key} has weight {weight} outside [0, 1]")]
    WeightOutOfRange { key: DimensionKey, weight: f64 },
    #[error("active dimension weights sum to {sum:.6}, expected 1.0")]
    WeightSumMismatch { sum: f64 },
    #[error("dimension {0} has no source mappings")]
    MissingSources(DimensionKey),
    #[error("dimension {0} uses threshold buckets without ascending bands")]
    InvalidBands(DimensionKey),
    #[error("no dimension configuration is effective for period {0}")]
    NoVersionForPeriod(Period),
    #[error("configuration for period {0} is locked by an in-flight run")]
    PeriodLocked(Period),
    #[error("a calculation run for period {0} is already in flight")]
    RunInFlight(Period),
}

#[derive(Debug)]
struct RegisteredVersion {
    effective_from: Period,
    set: Arc<DimensionSet>,
}

/// Append-only history of dimension configurations with per-period run locks.
#[derive(Debug)]
pub struct DimensionRegistry {
    versions: RwLock<Vec<RegisteredVersion>>,
    in_flight: Mutex<BTreeSet<Period>>,
}

impl DimensionRegistry {
    pub fn new(effective_from: Period, set: DimensionSet) -> Self {
        Self {
            versions: RwLock::new(vec![RegisteredVersion {
                effective_from,
                set: Arc::new(set),
            }]),
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    /// Snapshot a new configuration version effective from `effective_from` onwards.
    ///
    /// Existing versions are never mutated, so results computed against them stay
    /// reproducible. Fails while a run holds the lock for any affected period.
    pub fn publish(
        &self,
        effective_from: Period,
        dimensions: Vec<Dimension>,
    ) -> Result<Arc<DimensionSet>, RegistryError> {
        // Held until the new version is pushed; `in_flight` is always taken before `versions`.
        let in_flight = self.in_flight.lock().expect("registry lock poisoned");
        if let Some(period) = in_flight.range(effective_from..).next() {
            return Err(RegistryError::PeriodLocked(*period));
        }

        let mut versions = self.versions.write().expect("registry lock poisoned");
        let next_version = versions
            .iter()
            .map(|entry| entry.set.version())
            .max()
            .unwrap_or(0)
            + 1;
        let set = Arc::new(DimensionSet::new(next_version, dimensions)?);
        versions.push(RegisteredVersion {
            effective_from,
            set: set.clone(),
        });

        info!(version = next_version, %effective_from, "dimension configuration published");
        Ok(set)
    }

    /// Newest configuration effective at or before `period`.
    pub fn snapshot(&self, period: Period) -> Result<Arc<DimensionSet>, RegistryError> {
        let versions = self.versions.read().expect("registry lock poisoned");
        versions
            .iter()
            .rev()
            .find(|entry| entry.effective_from <= period)
            .map(|entry| entry.set.clone())
            .ok_or(RegistryError::NoVersionForPeriod(period))
    }

    /// `(effective_from, version)` pairs in publication order.
    pub fn versions(&self) -> Vec<(Period, u32)> {
        let versions = self.versions.read().expect("registry lock poisoned");
        versions
            .iter()
            .map(|entry| (entry.effective_from, entry.set.version()))
            .collect()
    }

    /// Take the exclusive configuration lock for `period` until the guard drops.
    pub fn lock_period(&self, period: Period) -> Result<PeriodLock<'_>, RegistryError> {
        let mut in_flight = self.in_flight.lock().expect("registry lock poisoned");
        if !in_flight.insert(period) {
            return Err(RegistryError::RunInFlight(period));
        }
        Ok(PeriodLock {
            registry: self,
            period,
        })
    }

    pub fn is_locked(&self, period: Period) -> bool {
        self.in_flight
            .lock()
            .expect("registry lock poisoned")
            .contains(&period)
    }
}

/// Guard releasing a period's configuration lock on drop.
#[derive(Debug)]
pub struct PeriodLock<'a> {
    registry: &'a DimensionRegistry,
    period: Period,
}

impl Drop for PeriodLock<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.registry.in_flight.lock() {
            in_flight.remove(&self.period);
        }
    }
}
