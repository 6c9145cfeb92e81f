mod auth;
mod budget;
mod extract;
mod horses;
mod pricing;
mod problem;
mod router;
mod telemetry;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;

use stallplass_storage::Database;
use stallplass_util::{load_env_file, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;
    info!(stage = "storage", "database ready");

    let state = router::AppState::new(
        metrics,
        storage,
        &config.auth_jwt_secret,
        config.budget_max_range_months,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
