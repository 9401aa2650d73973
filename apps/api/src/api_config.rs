use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use tempo_core::AppError;
use tempo_domain::ThrottlePolicy;
use tracing_subscriber::EnvFilter;

/// Limit type guarding admin endpoints against token guessing.
pub const ADMIN_AUTH_LIMIT: &str = "admin_auth";
/// Limit type guarding self-service status lookups.
pub const STATUS_LOOKUP_LIMIT: &str = "status_lookup";

#[derive(Debug, Clone)]
pub enum RateLimitStoreConfig {
    Postgres { database_url: String },
    Memory,
}

#[derive(Debug, Clone, Copy)]
struct PolicyDefaults {
    max_attempts: i32,
    window_seconds: i64,
    block_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub rate_limit_store: RateLimitStoreConfig,
    pub admin_token: String,
    pub api_host: String,
    pub api_port: u16,
    pub sweep_interval_seconds: u64,
    pub admin_auth_policy: ThrottlePolicy,
    pub status_lookup_policy: ThrottlePolicy,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let rate_limit_store = match env::var("RATE_LIMIT_STORE")
            .unwrap_or_else(|_| "postgres".to_owned())
            .as_str()
        {
            "postgres" => RateLimitStoreConfig::Postgres {
                database_url: required_env("DATABASE_URL")?,
            },
            "memory" => RateLimitStoreConfig::Memory,
            other => {
                return Err(AppError::Validation(format!(
                    "RATE_LIMIT_STORE must be either 'postgres' or 'memory', got '{other}'"
                )));
            }
        };

        let admin_token = required_env("ADMIN_API_TOKEN")?;
        if admin_token.len() < 32 {
            return Err(AppError::Validation(
                "ADMIN_API_TOKEN must be at least 32 characters".to_owned(),
            ));
        }

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = env::var("API_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3001);
        let lookup = |name: &str| env::var(name).ok();
        let sweep_interval_seconds = parsed_override(
            &lookup,
            "RATE_LIMIT_SWEEP_INTERVAL_SECONDS",
            300_u64,
        )?;
        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "RATE_LIMIT_SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let admin_auth_policy = limiter_policy(
            ADMIN_AUTH_LIMIT,
            PolicyDefaults {
                max_attempts: 5,
                window_seconds: 15 * 60,
                block_seconds: 60 * 60,
            },
            lookup,
        )?;
        let status_lookup_policy = limiter_policy(
            STATUS_LOOKUP_LIMIT,
            PolicyDefaults {
                max_attempts: 60,
                window_seconds: 60,
                block_seconds: 5 * 60,
            },
            lookup,
        )?;

        Ok(Self {
            migrate_only,
            rate_limit_store,
            admin_token,
            api_host,
            api_port,
            sweep_interval_seconds,
            admin_auth_policy,
            status_lookup_policy,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Builds a policy from `RATE_LIMIT_<NAME>_*` overrides on top of defaults.
fn limiter_policy(
    limit_type: &str,
    defaults: PolicyDefaults,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ThrottlePolicy, AppError> {
    let prefix = format!("RATE_LIMIT_{}", limit_type.to_ascii_uppercase());

    let max_attempts = parsed_override(
        &lookup,
        &format!("{prefix}_MAX_ATTEMPTS"),
        defaults.max_attempts,
    )?;
    let window_seconds = parsed_override(
        &lookup,
        &format!("{prefix}_WINDOW_SECONDS"),
        defaults.window_seconds,
    )?;
    let block_seconds = parsed_override(
        &lookup,
        &format!("{prefix}_BLOCK_SECONDS"),
        defaults.block_seconds,
    )?;

    ThrottlePolicy::from_seconds(limit_type, max_attempts, window_seconds, block_seconds)
}

fn parsed_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}

fn required_env(name: &str) -> Result<String, AppError> {
    let value = env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}
