//! PostgreSQL-backed throttle repository using the `rate_limits` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use tempo_application::RateLimitRepository;
use tempo_core::{AppError, AppResult};
use tempo_domain::RateLimitRecord;


const RECORD_COLUMNS: &str = "id, ip, limit_type, attempts, window_start, window_end, blocked, \
                              blocked_until, created_at, updated_at";

/// PostgreSQL implementation of the throttle repository port.
#[derive(Clone)]
pub struct PostgresRateLimitRepository {
    pool: PgPool,
}

impl PostgresRateLimitRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitRepository for PostgresRateLimitRepository {
    async fn find_active_block(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rate_limits
            WHERE ip = $1
              AND limit_type = $2
              AND blocked = TRUE
              AND blocked_until > $3
            ORDER BY blocked_until DESC
            LIMIT 1
            "#
        ))
        .bind(ip)
        .bind(limit_type)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find active block: {error}")))?;

        Ok(row.map(RateLimitRecord::from))
    }

    async fn find_active_window(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rate_limits
            WHERE ip = $1
              AND limit_type = $2
              AND window_end > $3
            ORDER BY window_end DESC
            LIMIT 1
            "#
        ))
        .bind(ip)
        .bind(limit_type)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find active window: {error}")))?;

        Ok(row.map(RateLimitRecord::from))
    }

    async fn find_latest_window(
        &self,
        ip: &str,
        limit_type: &str,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM rate_limits
            WHERE ip = $1
              AND limit_type = $2
            ORDER BY window_end DESC
            LIMIT 1
            "#
        ))
        .bind(ip)
        .bind(limit_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find latest window: {error}")))?;

        Ok(row.map(RateLimitRecord::from))
    }

    async fn create_window(&self, record: &RateLimitRecord) -> AppResult<RateLimitRecord> {
        let row = sqlx::query_as::<_, RateLimitRow>(&format!(
            r#"
            INSERT INTO rate_limits (
                id, ip, limit_type, attempts, window_start, window_end,
                blocked, blocked_until, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.id)
        .bind(record.ip.as_str())
        .bind(record.limit_type.as_str())
        .bind(record.attempts)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(record.blocked)
        .bind(record.blocked_until)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(database_error) = &error {
                if database_error.code().as_deref() == Some("23505") {
                    return AppError::Conflict(format!(
                        "rate limit window for '{}' ({}) ending at {} already exists",
                        record.ip, record.limit_type, record.window_end
                    ));
                }
            }

            AppError::Internal(format!("failed to create rate limit window: {error}"))
        })?;

        Ok(row.into())
    }

    async fn increment_attempts(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<RateLimitRecord> {
        // Atomic in-place increment.
        let row = sqlx::query_as::<_, RateLimitRow>(&format!(
            r#"
            UPDATE rate_limits
            SET attempts = attempts + 1,
                updated_at = $2
            WHERE id = $1
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to increment rate limit attempts: {error}"))
        })?;

        row.map(RateLimitRecord::from)
            .ok_or_else(|| AppError::NotFound(format!("rate limit window '{id}' does not exist")))
    }

    async fn mark_blocked(
        &self,
        id: Uuid,
        blocked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE rate_limits
            SET blocked = TRUE,
                blocked_until = $2,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(blocked_until)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to block rate limit window: {error}")))?;

        Ok(())
    }

    async fn delete_stale_windows(
        &self,
        ip: &str,
        limit_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limits
            WHERE ip = $1
              AND limit_type = $2
              AND window_end <= $3
              AND blocked = FALSE
            "#,
        )
        .bind(ip)
        .bind(limit_type)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to delete stale rate limit windows: {error}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn delete_client_windows(&self, ip: &str, limit_type: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limits
            WHERE ip = $1
              AND limit_type = $2
            "#,
        )
        .bind(ip)
        .bind(limit_type)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to reset rate limit windows: {error}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn delete_inert(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limits
            WHERE window_end <= $1
              AND (blocked = FALSE OR blocked_until <= $1)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to delete inert rate limit windows: {error}"))
        })?;

        let deleted = result.rows_affected();
        debug!(deleted, "inert rate limit windows deleted");
        Ok(deleted)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RateLimitRow {
    id: Uuid,
    ip: String,
    limit_type: String,
    attempts: i32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    blocked: bool,
    blocked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RateLimitRow> for RateLimitRecord {
    fn from(row: RateLimitRow) -> Self {
        Self {
            id: row.id,
            ip: row.ip,
            limit_type: row.limit_type,
            attempts: row.attempts,
            window_start: row.window_start,
            window_end: row.window_end,
            blocked: row.blocked,
            blocked_until: row.blocked_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
