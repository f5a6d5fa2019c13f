use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::dimension::{DimensionSet, DimensionSetDocument};
use super::domain::{PeerProfile, Period, Unit, UnitId};
use super::registry::RegistryError;
use super::store::{MemoryRecordStore, SourceRecord};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    InvalidRow { line: u64, reason: String },
    Registry(RegistryError),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read import file: {}", err),
            ImportError::Csv(err) => write!(f, "invalid CSV data: {}", err),
            ImportError::Json(err) => write!(f, "invalid dimension document: {}", err),
            ImportError::InvalidRow { line, reason } => {
                write!(f, "row {} rejected: {}", line, reason)
            }
            ImportError::Registry(err) => write!(f, "dimension configuration rejected: {}", err),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::Json(err) => Some(err),
            ImportError::InvalidRow { .. } => None,
            ImportError::Registry(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<RegistryError> for ImportError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

/// One row of a records export, addressed to a unit, period and source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRecord {
    pub unit_id: UnitId,
    pub period: Period,
    pub source: String,
    pub record: SourceRecord,
}

#[derive(Debug, Deserialize)]
struct UnitRow {
    unit_id: String,
    name: String,
    unit_type: String,
    region: String,
    population: u64,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    unit_id: String,
    period: i32,
    source: String,
    value: f64,
    #[serde(default)]
    denominator: Option<f64>,
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn line_of(reader: &csv::StringRecord) -> u64 {
    reader.position().map(|position| position.line()).unwrap_or(0)
}

/// Read `unit_id,name,unit_type,region,population[,active]` rows.
pub fn read_units<R: Read>(reader: R) -> Result<Vec<Unit>, ImportError> {
    let mut csv_reader = csv_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut units = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let row: UnitRow = record.deserialize(Some(&headers))?;
        if row.unit_id.is_empty() {
            return Err(ImportError::InvalidRow {
                line: line_of(&record),
                reason: "unit_id is empty".to_string(),
            });
        }
        units.push(Unit {
            id: UnitId(row.unit_id),
            name: row.name,
            active: row.active,
            profile: PeerProfile {
                unit_type: row.unit_type,
                region: row.region,
                population: row.population,
            },
            latest: None,
        });
    }

    Ok(units)
}

/// Read `unit_id,period,source,value[,denominator]` rows.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<ImportedRecord>, ImportError> {
    let mut csv_reader = csv_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut records = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let row: RecordRow = record.deserialize(Some(&headers))?;
        let finite = row.value.is_finite() && row.denominator.map_or(true, f64::is_finite);
        if !finite {
            return Err(ImportError::InvalidRow {
                line: line_of(&record),
                reason: format!("non-finite value for source {}", row.source),
            });
        }
        records.push(ImportedRecord {
            unit_id: UnitId(row.unit_id),
            period: Period(row.period),
            source: row.source,
            record: SourceRecord {
                value: row.value,
                denominator: row.denominator,
            },
        });
    }

    Ok(records)
}

/// Read a `{ "version": n, "dimensions": [...] }` document and validate it.
pub fn read_dimensions<R: Read>(reader: R) -> Result<DimensionSet, ImportError> {
    let document: DimensionSetDocument = serde_json::from_reader(reader)?;
    Ok(DimensionSet::try_from(document)?)
}

pub fn units_from_path(path: impl AsRef<Path>) -> Result<Vec<Unit>, ImportError> {
    read_units(File::open(path)?)
}

pub fn records_from_path(path: impl AsRef<Path>) -> Result<Vec<ImportedRecord>, ImportError> {
    read_records(File::open(path)?)
}

pub fn dimensions_from_path(path: impl AsRef<Path>) -> Result<DimensionSet, ImportError> {
    read_dimensions(File::open(path)?)
}

/// Append imported rows to an in-memory store.
pub fn load_records(store: &MemoryRecordStore, records: &[ImportedRecord]) {
    for imported in records {
        store.push(
            &imported.unit_id,
            imported.period,
            &imported.source,
            imported.record,
        );
    }
}
