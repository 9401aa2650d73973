use serde::Serialize;
use tempo_domain::ThrottleStatus;
use ts_rs::TS;

/// Health response payload.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-response.ts"
)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub postgres: HealthDependencyStatus,
}

/// One runtime dependency health status.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-dependency-status.ts"
)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    pub detail: Option<String>,
}

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/rate-limited-response.ts"
)]
pub struct RateLimitedResponse {
    pub message: String,
    /// Milliseconds until the block lifts.
    pub retry_after: i64,
}

/// A client's standing under one limiter.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/rate-limit-status-response.ts"
)]
pub struct RateLimitStatusResponse {
    pub client_id: String,
    pub limit_type: String,
    pub attempts: i32,
    pub limit: i32,
    pub remaining: i32,
    pub blocked: bool,
    pub retry_after: i64,
}

impl From<ThrottleStatus> for RateLimitStatusResponse {
    fn from(value: ThrottleStatus) -> Self {
        Self {
            client_id: value.client_id,
            limit_type: value.limit_type,
            attempts: value.attempts,
            limit: value.limit,
            remaining: value.remaining,
            blocked: value.block.blocked,
            retry_after: value.block.retry_after_ms,
        }
    }
}

/// Result of clearing a client's throttle state.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/rate-limit-reset-response.ts"
)]
pub struct RateLimitResetResponse {
    pub client_id: String,
    pub limit_type: String,
    pub deleted_windows: u64,
}
