use crate::demo::{run_demo, DemoArgs};
use crate::infra::DataFiles;
use crate::server;
use clap::{Args, Parser, Subcommand};
use innovation_index::config::AppConfig;
use innovation_index::engine::{Period, ResultRepository, RunError, RunReport, UnitId};
use innovation_index::error::AppError;
use innovation_index::telemetry;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Innovation Index",
    about = "Compute, publish and serve municipal innovation index results",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Calculate and publish one period from CSV exports
    Run(RunArgs),
    /// Score a synthetic set of municipalities and print the ranking
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Unit CSV export to serve; requires --records
    #[arg(long, requires = "records")]
    pub(crate) units: Option<PathBuf>,
    /// Source record CSV export to serve; requires --units
    #[arg(long, requires = "units")]
    pub(crate) records: Option<PathBuf>,
    /// Dimension configuration JSON (defaults to the standard dimensions)
    #[arg(long)]
    pub(crate) dimensions: Option<PathBuf>,
    /// Serve the synthetic demo dataset instead of files
    #[arg(long, conflicts_with_all = ["units", "records"])]
    pub(crate) demo: bool,
}

impl ServeArgs {
    pub(crate) fn data_files(&self) -> Option<DataFiles> {
        match (&self.units, &self.records) {
            (Some(units), Some(records)) => Some(DataFiles {
                units: units.clone(),
                records: records.clone(),
                dimensions: self.dimensions.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Period (calendar year) to calculate
    #[arg(long)]
    pub(crate) period: i32,
    /// Unit CSV export: unit_id,name,unit_type,region,population[,active]
    #[arg(long)]
    pub(crate) units: PathBuf,
    /// Source record CSV export: unit_id,period,source,value[,denominator]
    #[arg(long)]
    pub(crate) records: PathBuf,
    /// Dimension configuration JSON (defaults to the standard dimensions)
    #[arg(long)]
    pub(crate) dimensions: Option<PathBuf>,
    /// Units to recalculate (inactive ones included); the whole period is re-ranked
    #[arg(long = "unit", value_name = "UNIT_ID")]
    pub(crate) unit_ids: Vec<String>,
    /// Write the report and published results as JSON to this file instead of stdout
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Run(args) => run_period(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn run_period(args: RunArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let files = DataFiles {
        units: args.units,
        records: args.records,
        dimensions: args.dimensions,
    };
    let engine = files.load(config.engine)?;
    let period = Period(args.period);
    let unit_ids = if args.unit_ids.is_empty() {
        None
    } else {
        Some(args.unit_ids.into_iter().map(UnitId::new).collect())
    };

    let report = engine.run(period, unit_ids)?;
    let results = engine
        .results()
        .published(period)
        .map_err(RunError::from)?;
    let document = json!({ "report": report, "results": results });

    match args.output {
        Some(path) => {
            let file = std::fs::File::create(&path)?;
            serde_json::to_writer_pretty(file, &document)?;
            eprintln!("wrote {} results to {}", results.len(), path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&document)?),
    }

    ensure_published(&report)
}

/// Turn a failed or cancelled run into an error so the process exits non-zero.
fn ensure_published(report: &RunReport) -> Result<(), AppError> {
    if report.is_published() {
        return Ok(());
    }
    let reason = match &report.failure {
        Some(failure) => failure.to_string(),
        None => format!("run {} was cancelled", report.run_id),
    };
    Err(AppError::NotPublished {
        period: report.period,
        reason,
    })
}
