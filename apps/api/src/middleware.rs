use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tempo_application::Limiter;

use crate::client_id::ClientId;
use crate::throttle::rejection_response;

/// Rejects blocked clients, then counts the pass per the limiter's mode.
///
/// Mount with `from_fn_with_state(limiter, throttle)`.
pub async fn throttle(
    State(limiter): State<Limiter>,
    client_id: ClientId,
    request: Request,
    next: Next,
) -> Response {
    let block = limiter.is_blocked(client_id.as_str()).await;
    if block.blocked {
        return rejection_response(block);
    }

    let mut response = next.run(request).await;
    let succeeded = response.status().is_success();

    let recorded = limiter
        .record_outcome(client_id.as_str(), succeeded)
        .await
        .filter(|attempt| attempt.attempt_count > 0);

    if let Some(attempt) = recorded {
        let policy = limiter.policy();
        let headers = response.headers_mut();
        headers.insert(
            "x-ratelimit-limit",
            HeaderValue::from(policy.max_attempts()),
        );
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from(policy.remaining(attempt.attempt_count)),
        );
    }

    response
}
