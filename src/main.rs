//! Gate Forecast API - read-only analytics over gate token forecasts

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gate_forecast_api::config::{LogFormat, Settings};
use gate_forecast_api::db::PgForecastStore;
use gate_forecast_api::routes;
use gate_forecast_api::state::AppState;
use gate_forecast_api::store::{ForecastStore, MemoryForecastStore};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gate_forecast_api=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);

    // Connect to the forecast store
    let store: Arc<dyn ForecastStore> = match &settings.database_url {
        Some(url) => {
            let store = PgForecastStore::connect(
                url,
                settings.db_max_connections,
                &settings.tokens_table,
            )
            .await
            .context("Failed to connect to database")?;
            info!(
                "Database: {}",
                url.split('@').last().unwrap_or("***")
            );
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, serving from an empty in-memory store");
            Arc::new(MemoryForecastStore::new())
        }
    };

    let listen_addr = settings.listen_addr;
    info!(
        "Gate Forecast API v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        listen_addr
    );
    info!(
        timezone = %settings.timezone,
        table = %settings.tokens_table,
        backend = store.backend(),
        "Configuration loaded"
    );

    let app = routes::router(AppState::new(settings, store));

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
