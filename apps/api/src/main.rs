//! Tempo API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod client_id;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;
mod throttle;

use std::net::SocketAddr;

use tempo_core::AppError;
use tracing::info;

use crate::api_config::{ApiConfig, RateLimitStoreConfig, init_tracing};
use crate::api_router::build_router;
use crate::api_services::{build_app_state, connect_and_migrate};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    let postgres_pool = match &config.rate_limit_store {
        RateLimitStoreConfig::Postgres { database_url } => {
            Some(connect_and_migrate(database_url).await?)
        }
        RateLimitStoreConfig::Memory => None,
    };

    if config.migrate_only {
        match postgres_pool {
            Some(_) => info!("migrations applied successfully"),
            None => info!("in-memory rate limit store has no migrations to apply"),
        }
        return Ok(());
    }

    let app_state = build_app_state(&config, postgres_pool)?;
    let app = build_router(app_state);

    let address = config.socket_address()?;
    info!(%address, "tempo api listening");

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind API listener: {error}")))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| AppError::Internal(format!("API server failed: {error}")))
}
