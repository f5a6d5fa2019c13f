use crate::infra::{build_engine, InMemoryEngine};
use clap::Args;
use innovation_index::engine::{
    DimensionSet, EngineSettings, ImportedRecord, IndexResult, PeerProfile, Period,
    ResultRepository, RunError, RunReport, SourceRecord, Unit, UnitId,
};
use innovation_index::error::AppError;

const UNIT_TYPES: [&str; 3] = ["city", "town", "village"];
const REGIONS: [&str; 2] = ["north", "south"];
const DEFAULT_PERIOD: i32 = 2024;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of synthetic municipalities to score
    #[arg(long, default_value_t = 12)]
    pub(crate) municipalities: usize,
    /// Period to publish; the preceding period is published first for trends
    #[arg(long, default_value_t = DEFAULT_PERIOD)]
    pub(crate) period: i32,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let period = Period(args.period);
    let (units, records) = demo_dataset(args.municipalities, period);
    let engine = build_engine(
        units,
        &records,
        DimensionSet::standard(),
        EngineSettings::default(),
    );

    println!("Innovation index demo");
    println!(
        "- {} municipalities | {} source records | periods {} and {}",
        args.municipalities,
        records.len(),
        period.previous(),
        period
    );

    for target in [period.previous(), period] {
        let report = engine.run(target, None)?;
        render_run_summary(&report);
        if !report.is_published() {
            return Ok(());
        }
    }

    let mut results = engine
        .results()
        .published(period)
        .map_err(RunError::from)?;
    results.sort_by(|a, b| {
        a.national_rank
            .cmp(&b.national_rank)
            .then_with(|| a.unit_id.cmp(&b.unit_id))
    });
    render_ranking(&results);
    Ok(())
}

pub(crate) fn render_run_summary(report: &RunReport) {
    println!(
        "\nRun {} for {} -> {:?}",
        report.run_id, report.period, report.status
    );
    if let Some(failure) = &report.failure {
        println!("  Failure: {failure}");
    }
    if let Some(version) = report.config_version {
        println!("  Dimension configuration v{version}");
    }
    println!(
        "  {} of {} units published | {} gap fills | {} low confidence",
        report.units_published,
        report.units_scored,
        report.gap_fills.len(),
        report.low_confidence.len()
    );
    for fill in &report.gap_fills {
        println!(
            "    - {} {} estimated at {:.2} ({:?})",
            fill.unit_id, fill.dimension, fill.value, fill.method
        );
    }
    for failure in &report.unit_failures {
        println!("    ! {} failed: {}", failure.unit_id, failure.reason);
    }
}

pub(crate) fn render_ranking(results: &[IndexResult]) {
    println!("\nNational ranking");
    println!(
        "  {:>4}  {:<10} {:>8} {:>6} {:>5}  {:<6} {}",
        "rank", "unit", "overall", "compl", "peer", "trend", "estimated"
    );
    for result in results {
        let trend = result
            .trend
            .map(|assessment| format!("{} {:+.1}", assessment.trend.label(), assessment.delta))
            .unwrap_or_else(|| "new".to_string());
        let estimated: Vec<String> = result
            .estimated_dimensions()
            .map(|key| key.to_string())
            .collect();
        let confidence = if result.low_confidence { "*" } else { "" };
        println!(
            "  {:>4}  {:<10} {:>8.2} {:>5.0}{:<1} {:>5}  {:<6} {}",
            result.national_rank,
            result.unit_id,
            result.overall,
            result.completeness,
            confidence,
            format!("{}/{}", result.peer_rank, result.peer_group.members.len()),
            trend,
            estimated.join(", ")
        );
    }
}

/// Engine over the synthetic dataset together with the period it targets.
pub(crate) fn demo_engine(
    municipalities: usize,
    settings: EngineSettings,
) -> (InMemoryEngine, Period) {
    let period = Period(DEFAULT_PERIOD);
    let (units, records) = demo_dataset(municipalities, period);
    let engine = build_engine(units, &records, DimensionSet::standard(), settings);
    (engine, period)
}

/// Deterministic municipalities with records for `period` and the one before it.
///
/// Every fifth municipality stops reporting training sessions in `period`, so its
/// innovation capacity is estimated.
pub(crate) fn demo_dataset(
    municipalities: usize,
    period: Period,
) -> (Vec<Unit>, Vec<ImportedRecord>) {
    let units: Vec<Unit> = (0..municipalities).map(demo_unit).collect();
    let mut records = Vec::new();

    for (index, unit) in units.iter().enumerate() {
        for target in [period.previous(), period] {
            let level = activity_level(index, target);
            let push = |records: &mut Vec<ImportedRecord>, source: &str, record: SourceRecord| {
                records.push(ImportedRecord {
                    unit_id: unit.id.clone(),
                    period: target,
                    source: source.to_string(),
                    record,
                });
            };

            for _ in 0..level {
                push(&mut records, "challenges", SourceRecord::value(1.0));
            }
            let successes = (level + (index % 3) as u32).min(10);
            push(
                &mut records,
                "pilots",
                SourceRecord::ratio(f64::from(successes), 10.0),
            );
            push(
                &mut records,
                "partnerships",
                SourceRecord::value(2.0 + f64::from(level % 5)),
            );
            push(
                &mut records,
                "partnerships",
                SourceRecord::value(3.0 + (index % 4) as f64),
            );
            push(
                &mut records,
                "digital_services",
                SourceRecord::ratio(f64::from(level * 9) + (index % 7) as f64, 100.0),
            );
            for _ in 0..=(index % 4) {
                push(&mut records, "innovation_staff", SourceRecord::value(1.0));
            }
            if target == period && index % 5 == 4 {
                continue;
            }
            for _ in 0..=(level / 3) {
                push(&mut records, "training_sessions", SourceRecord::value(1.0));
            }
        }
    }

    (units, records)
}

fn demo_unit(index: usize) -> Unit {
    let unit_type = UNIT_TYPES[index % UNIT_TYPES.len()];
    let offset = index as u64;
    let population = match unit_type {
        "city" => 40_000 + offset * 7_500,
        "town" => 12_000 + offset * 900,
        _ => 2_500 + offset * 150,
    };
    Unit {
        id: UnitId::new(format!("mun-{:03}", index + 1)),
        name: format!("Demo {} {}", unit_type, index + 1),
        active: true,
        profile: PeerProfile {
            unit_type: unit_type.to_string(),
            region: REGIONS[index % REGIONS.len()].to_string(),
            population,
        },
        latest: None,
    }
}

fn activity_level(index: usize, period: Period) -> u32 {
    let seed = index as i64 * 7 + i64::from(period.year()) * 3;
    1 + seed.rem_euclid(9) as u32
}
