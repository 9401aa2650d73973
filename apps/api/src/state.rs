use sqlx::PgPool;
use tempo_application::Limiter;

/// Limiters bound by the composition root.
#[derive(Clone)]
pub struct Limiters {
    pub admin_auth: Limiter,
    pub status_lookup: Limiter,
}

impl Limiters {
    /// Finds a limiter by its limit type.
    pub fn by_type(&self, limit_type: &str) -> Option<&Limiter> {
        [&self.admin_auth, &self.status_lookup]
            .into_iter()
            .find(|limiter| limiter.limit_type() == limit_type)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiters: Limiters,
    pub admin_token: String,
    pub postgres_pool: Option<PgPool>,
}
