use crate::cli::ServeArgs;
use crate::demo::demo_engine;
use crate::infra::{build_engine, AppState, InMemoryEngine};
use crate::routes::with_index_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use innovation_index::config::AppConfig;
use innovation_index::engine::{DimensionSet, EngineSettings};
use innovation_index::error::AppError;
use innovation_index::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

const DEMO_MUNICIPALITIES: usize = 24;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = Arc::new(load_engine(&args, config.engine)?);

    let app = with_index_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "innovation index service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn load_engine(args: &ServeArgs, settings: EngineSettings) -> Result<InMemoryEngine, AppError> {
    if let Some(files) = args.data_files() {
        return files.load(settings);
    }

    if args.demo {
        let (engine, period) = demo_engine(DEMO_MUNICIPALITIES, settings);
        info!(
            municipalities = DEMO_MUNICIPALITIES,
            %period,
            "serving synthetic demo dataset"
        );
        return Ok(engine);
    }

    warn!("no data files configured; serving an empty dataset");
    Ok(build_engine(
        Vec::new(),
        &[],
        DimensionSet::standard(),
        settings,
    ))
}
