use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tempo_application::{Limiter, RateLimitRepository, ThrottleService};
use tempo_core::AppError;
use tempo_domain::CountingMode;
use tempo_infrastructure::{InMemoryRateLimitRepository, PostgresRateLimitRepository};
use tracing::info;

use crate::api_config::{ApiConfig, RateLimitStoreConfig};
use crate::state::{AppState, Limiters};

use super::sweeper::spawn_rate_limit_sweeper;

pub fn build_app_state(
    config: &ApiConfig,
    postgres_pool: Option<PgPool>,
) -> Result<AppState, AppError> {
    let rate_limit_repository: Arc<dyn RateLimitRepository> = match &config.rate_limit_store {
        RateLimitStoreConfig::Postgres { .. } => {
            let pool = postgres_pool.clone().ok_or_else(|| {
                AppError::Internal("postgres rate limit store requires a connection pool".to_owned())
            })?;
            Arc::new(PostgresRateLimitRepository::new(pool))
        }
        RateLimitStoreConfig::Memory => {
            info!("using in-memory rate limit store; state is not shared between instances");
            Arc::new(InMemoryRateLimitRepository::new())
        }
    };
    let throttle_service = ThrottleService::new(rate_limit_repository);

    // No worker sweeps process memory, so the API evicts its own inert rows.
    if matches!(config.rate_limit_store, RateLimitStoreConfig::Memory) {
        spawn_rate_limit_sweeper(
            throttle_service.clone(),
            Duration::from_secs(config.sweep_interval_seconds),
        );
    }

    Ok(AppState {
        limiters: build_limiters(throttle_service, config),
        admin_token: config.admin_token.clone(),
        postgres_pool,
    })
}

/// Binds the built-in limiters to one evaluator.
pub fn build_limiters(service: ThrottleService, config: &ApiConfig) -> Limiters {
    Limiters {
        admin_auth: Limiter::new(
            service.clone(),
            config.admin_auth_policy.clone(),
            CountingMode::failures_only(),
        ),
        status_lookup: Limiter::new(
            service,
            config.status_lookup_policy.clone(),
            CountingMode::EveryPass,
        ),
    }
}
