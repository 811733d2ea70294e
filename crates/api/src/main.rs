//! # jotter-api
//!
//! Realtime gateway for Jotter: authenticated WebSocket connections, presence,
//! 1:1 messaging and friend events, backed by Postgres.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use jotter_api::auth::{JwtManager, JwtVerifier};
use jotter_api::routes::create_router;
use jotter_api::store::{PgStore, Stores};
use jotter_api::{AppState, Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        "Starting jotter-api"
    );

    let pool = jotter_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    jotter_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let stores = Stores::from_backend(Arc::new(PgStore::new(pool)));
    let verifier = Arc::new(JwtVerifier::new(
        JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours),
        Arc::clone(&stores.users),
    ));

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, stores, verifier);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jotter_api=debug,tower_http=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
