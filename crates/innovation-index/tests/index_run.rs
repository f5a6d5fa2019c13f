use std::sync::Arc;

use innovation_index::engine::import::{load_records, read_dimensions, read_records, read_units};
use innovation_index::engine::{
    DimensionKey, DimensionRegistry, DimensionSet, EngineSettings, IndexEngine,
    MemoryRecordStore, MemoryResultRepository, MemoryUnitRepository, Period, ResultRepository,
    RunStatus, Trend, UnitId,
};

const UNITS: &str = "unit_id,name,unit_type,region,population,active\n\
mun-001,Northhaven,city,north,85000,true\n\
mun-002,Eastbrook,city,north,64000,true\n\
mun-003,Westmoor,city,north,52000,true\n\
mun-004,Oakridge,town,south,12000,true\n\
mun-005,Old Mill,town,south,9000,false\n";

fn records() -> String {
    let mut csv = String::from("unit_id,period,source,value,denominator\n");
    let profiles = [("mun-001", 6, 7.0), ("mun-002", 4, 5.0), ("mun-003", 2, 3.0), ("mun-004", 3, 4.0)];
    for period in [2023, 2024] {
        for (unit, challenges, satisfaction) in profiles {
            let boost = if unit == "mun-003" && period == 2024 { 4 } else { 0 };
            for _ in 0..challenges + boost {
                csv.push_str(&format!("{unit},{period},challenges,1,\n"));
            }
            csv.push_str(&format!("{unit},{period},pilots,{},10\n", challenges + boost));
            csv.push_str(&format!("{unit},{period},partnerships,{satisfaction},\n"));
            csv.push_str(&format!("{unit},{period},digital_services,{},100\n", challenges * 10));
            csv.push_str(&format!("{unit},{period},innovation_staff,1,\n"));
            if unit != "mun-004" {
                csv.push_str(&format!("{unit},{period},training_sessions,1,\n"));
            }
        }
    }
    csv
}

type CsvEngine = IndexEngine<MemoryRecordStore, MemoryUnitRepository, MemoryResultRepository>;

fn engine_from_csv(dimensions: DimensionSet) -> (CsvEngine, Arc<MemoryResultRepository>) {
    let units = read_units(UNITS.as_bytes()).expect("units import");
    let imported = read_records(records().as_bytes()).expect("records import");
    let store = MemoryRecordStore::new();
    load_records(&store, &imported);

    let results = Arc::new(MemoryResultRepository::new());
    let engine = IndexEngine::new(
        Arc::new(DimensionRegistry::new(Period(2020), dimensions)),
        Arc::new(store),
        Arc::new(MemoryUnitRepository::new(units)),
        results.clone(),
        EngineSettings::default(),
    );
    (engine, results)
}

#[test]
fn imported_dataset_publishes_two_consecutive_periods() {
    let (engine, results) = engine_from_csv(DimensionSet::standard());

    let first = engine.run(Period(2023), None).expect("2023 run");
    let second = engine.run(Period(2024), None).expect("2024 run");

    assert_eq!(first.status, RunStatus::Published);
    assert_eq!(second.status, RunStatus::Published);
    assert_eq!(second.units_requested, 4, "inactive unit is skipped");

    let published = results.published(Period(2024)).expect("published");
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|result| result.trend.is_some()));

    let westmoor = published
        .iter()
        .find(|result| result.unit_id == UnitId::new("mun-003"))
        .expect("westmoor scored");
    let trend = westmoor.trend.expect("trend");
    assert_eq!(trend.previous_period, Period(2023));
    assert_eq!(trend.trend, Trend::Up);

    let oakridge = published
        .iter()
        .find(|result| result.unit_id == UnitId::new("mun-004"))
        .expect("oakridge scored");
    assert!(oakridge.dimensions[&DimensionKey::new("innovation_capacity")]
        .provenance
        .is_estimated());
    assert_eq!(oakridge.peer_group.members, vec![UnitId::new("mun-004")]);
    assert_eq!(oakridge.peer_rank, 1);
}

#[test]
fn dimension_document_drives_the_calculation() {
    let document = r#"{
        "version": 7,
        "dimensions": [
            {
                "key": "challenge_activity",
                "name": "Challenge activity",
                "weight": 0.7,
                "sources": [{ "source": "challenges", "aggregation": "count" }],
                "normalization": "min_max"
            },
            {
                "key": "partnership_health",
                "name": "Partnership health",
                "weight": 0.3,
                "sources": [{ "source": "partnerships", "aggregation": "average" }],
                "normalization": "min_max"
            }
        ]
    }"#;
    let dimensions = read_dimensions(document.as_bytes()).expect("document parses");
    let (engine, results) = engine_from_csv(dimensions);

    let report = engine.run(Period(2023), None).expect("run");

    assert_eq!(report.config_version, Some(7));
    let mut published = results.published(Period(2023)).expect("published");
    published.sort_by_key(|result| result.national_rank);
    assert_eq!(published[0].unit_id, UnitId::new("mun-001"));
    assert_eq!(published[0].overall, 100.0);
    assert_eq!(published[3].unit_id, UnitId::new("mun-003"));
    assert_eq!(published[3].overall, 0.0);
    assert!(published.iter().all(|result| result.dimensions.len() == 2));
}
