use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use tempo_application::Limiter;
use tempo_core::AppError;

use crate::client_id::ClientId;
use crate::dto::{RateLimitResetResponse, RateLimitStatusResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, Limiters};
use crate::throttle::guarded;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub async fn admin_rate_limit_status_handler(
    State(state): State<AppState>,
    caller: ClientId,
    headers: HeaderMap,
    Path((limit_type, client_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    guarded(&state.limiters.admin_auth, &caller, async {
        authorize_admin(&headers, &state.admin_token)?;
        let limiter = limiter_for(&state.limiters, &limit_type)?;
        let status = limiter.status(&client_id).await?;

        Ok::<_, ApiError>(Json(RateLimitStatusResponse::from(status)))
    })
    .await
}

pub async fn admin_rate_limit_reset_handler(
    State(state): State<AppState>,
    caller: ClientId,
    headers: HeaderMap,
    Path((limit_type, client_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    guarded(&state.limiters.admin_auth, &caller, async {
        authorize_admin(&headers, &state.admin_token)?;
        let limiter = limiter_for(&state.limiters, &limit_type)?;
        let deleted_windows = limiter.reset(&client_id).await?;

        tracing::info!(
            client_id = %client_id,
            limit_type = %limit_type,
            deleted_windows,
            "rate limit state reset by admin"
        );

        Ok::<_, ApiError>(Json(RateLimitResetResponse {
            client_id,
            limit_type,
            deleted_windows,
        }))
    })
    .await
}

/// Reports the caller's own standing under `limit_type`.
pub async fn own_rate_limit_status_handler(
    State(state): State<AppState>,
    caller: ClientId,
    Path(limit_type): Path<String>,
) -> ApiResult<Json<RateLimitStatusResponse>> {
    let limiter = limiter_for(&state.limiters, &limit_type)?;
    let status = limiter.status(caller.as_str()).await?;

    Ok(Json(RateLimitStatusResponse::from(status)))
}

fn authorize_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), AppError> {
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() || provided != admin_token {
        return Err(AppError::Unauthorized("invalid admin token".to_owned()));
    }

    Ok(())
}

fn limiter_for<'a>(limiters: &'a Limiters, limit_type: &str) -> Result<&'a Limiter, AppError> {
    limiters
        .by_type(limit_type)
        .ok_or_else(|| AppError::NotFound(format!("unknown rate limit type '{limit_type}'")))
}
