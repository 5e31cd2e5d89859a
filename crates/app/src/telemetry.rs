use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

use order_board_util::{AppConfig, Environment};

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `kind`/`result` pairs emitted on `csv_exports_total`.
const EXPORT_SERIES: [(&str, &str); 4] = [
    ("current", "ok"),
    ("current", "refused"),
    ("historical", "ok"),
    ("historical", "not_found"),
];

/// `outcome` values emitted on `order_lock_total`.
const LOCK_OUTCOMES: [&str; 3] = ["closed", "already_closed", "not_found"];

static METRICS: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

fn build_git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "info,order_board_app=debug,sqlx=warn",
        Environment::Test => "warn",
        Environment::Production => "info,sqlx=warn",
    }
}

/// Installs the global subscriber: pretty output outside production, JSON lines in production.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.environment)));

    let base = tracing_fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339());
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.environment {
        Environment::Production => base.json().boxed(),
        Environment::Development | Environment::Test => base.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        timezone = %config.timezone,
        version = BUILD_VERSION,
        git_sha = build_git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
///
/// Board counters are registered at zero so every series is visible before
/// the first request.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut slot = METRICS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    START_TIME.get_or_init(Instant::now);

    describe_gauge!("app_build_info", "Build metadata for the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since the process started");
    describe_counter!(
        "summary_requests_total",
        "Count of order status summaries computed"
    );
    describe_counter!(
        "csv_exports_total",
        "Count of CSV exports, labelled by kind and result"
    );
    describe_counter!(
        "order_list_requests_total",
        "Count of order list screens built"
    );
    describe_counter!(
        "order_lock_total",
        "Count of ordering window close requests, labelled by outcome"
    );

    gauge!("app_build_info", "version" => BUILD_VERSION, "git" => build_git_sha()).set(1.0);
    counter!("summary_requests_total").absolute(0);
    counter!("order_list_requests_total").absolute(0);
    for (kind, result) in EXPORT_SERIES {
        counter!("csv_exports_total", "kind" => kind, "result" => result).absolute(0);
    }
    for outcome in LOCK_OUTCOMES {
        counter!("order_lock_total", "outcome" => outcome).absolute(0);
    }

    *slot = Some(handle.clone());
    Ok(handle)
}

/// Refreshes the uptime gauge and renders the Prometheus text format.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    gauge!("app_uptime_seconds").set(uptime);

    handle.render()
}
