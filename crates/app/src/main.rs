mod problem;
mod router;
mod summary;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use order_board_storage::Database;
use order_board_util::{load_env_file, AppConfig};

use crate::summary::{OrderSummaryService, SummarySettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    if let Some(path) = env_file {
        info!(stage = "app", path = %path.display(), "loaded environment file");
    }
    let metrics = telemetry::init_metrics()?;

    let settings = SummarySettings::from_config(&config)?;

    let database = Database::connect(&config.database_url).await?;
    if config.run_migrations {
        database.run_migrations().await?;
        info!(stage = "app", "database migrations applied");
    }

    let catalog = match &config.catalog_database_url {
        Some(url) => {
            info!(stage = "app", "using separate product catalog database");
            Database::connect(url).await?
        }
        None => database.clone(),
    };

    let service = OrderSummaryService::new(database, catalog, settings);
    let state = router::AppState::new(metrics, service);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        timezone = %config.timezone,
        default_center_id = config.default_center_id,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
