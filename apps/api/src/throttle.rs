use std::future::Future;

use axum::Json;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tempo_application::{Guarded, Limiter};
use tempo_domain::BlockStatus;

use crate::client_id::ClientId;
use crate::dto::RateLimitedResponse;
use crate::error::ApiResult;

const REJECTION_MESSAGE: &str = "Too many requests. Please try again later.";

/// Builds the `429` returned to a blocked client.
pub fn rejection_response(block: BlockStatus) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitedResponse {
            message: REJECTION_MESSAGE.to_owned(),
            retry_after: block.retry_after_ms,
        }),
    )
        .into_response();

    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(block.retry_after_seconds()));
    response
}

/// Runs a handler body under `limiter`.
///
/// A `2xx` response counts as a success; any other status or an error counts
/// as a failure. Errors are returned unchanged once the attempt is recorded.
pub async fn guarded<R, Fut>(
    limiter: &Limiter,
    client_id: &ClientId,
    handler: Fut,
) -> ApiResult<Response>
where
    R: IntoResponse,
    Fut: Future<Output = ApiResult<R>>,
{
    let outcome = limiter
        .guard(
            client_id.as_str(),
            |response: &Response| response.status().is_success(),
            async { handler.await.map(IntoResponse::into_response) },
        )
        .await?;

    Ok(match outcome {
        Guarded::Rejected(block) => rejection_response(block),
        Guarded::Completed(response) => response,
    })
}
