//! Tempo maintenance worker: periodically sweeps inert throttle rows.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tempo_application::ThrottleService;
use tempo_core::{AppError, AppResult};
use tempo_infrastructure::PostgresRateLimitRepository;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    sweep_interval_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let throttle_service = ThrottleService::new(Arc::new(PostgresRateLimitRepository::new(pool)));

    info!(
        sweep_interval_seconds = config.sweep_interval_seconds,
        "tempo-worker started"
    );

    loop {
        match throttle_service.sweep().await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "swept inert rate limit windows"),
            Err(error) => warn!(error = %error, "rate limit sweep failed"),
        }

        tokio::time::sleep(Duration::from_secs(config.sweep_interval_seconds)).await;
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let sweep_interval_seconds = parse_env_u64("RATE_LIMIT_SWEEP_INTERVAL_SECONDS", 300)?;

        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "RATE_LIMIT_SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            sweep_interval_seconds,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
