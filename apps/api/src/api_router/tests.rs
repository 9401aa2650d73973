use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tempo_application::{Limiter, ThrottleService};
use tempo_domain::{CountingMode, ThrottlePolicy};
use tempo_infrastructure::InMemoryRateLimitRepository;
use tower::ServiceExt;

use super::build_router;
use crate::state::{AppState, Limiters};

const ADMIN_TOKEN: &str = "0123456789abcdef0123456789abcdef";

fn policy(limit_type: &str, max_attempts: i32) -> ThrottlePolicy {
    ThrottlePolicy::from_seconds(limit_type, max_attempts, 60, 300)
        .unwrap_or_else(|error| panic!("invalid test policy: {error}"))
}

fn test_app(admin_max_attempts: i32, lookup_max_attempts: i32) -> Router {
    let service = ThrottleService::new(Arc::new(InMemoryRateLimitRepository::new()));
    let limiters = Limiters {
        admin_auth: Limiter::new(
            service.clone(),
            policy("admin_auth", admin_max_attempts),
            CountingMode::failures_only(),
        ),
        status_lookup: Limiter::new(
            service,
            policy("status_lookup", lookup_max_attempts),
            CountingMode::EveryPass,
        ),
    };

    build_router(AppState {
        limiters,
        admin_token: ADMIN_TOKEN.to_owned(),
        postgres_pool: None,
    })
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    client: &str,
    admin_token: Option<&str>,
) -> Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client);
    if let Some(token) = admin_token {
        builder = builder.header("x-admin-token", token);
    }
    let request = builder
        .body(Body::empty())
        .unwrap_or_else(|error| panic!("failed to build request: {error}"));

    app.clone()
        .oneshot(request)
        .await
        .unwrap_or_else(|error| match error {})
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|error| panic!("failed to read body: {error}"));
    serde_json::from_slice(&bytes).unwrap_or_else(|error| panic!("invalid json body: {error}"))
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn middleware_counts_every_pass_and_rejects_after_block() {
    let app = test_app(5, 2);
    let uri = "/api/rate-limits/status_lookup";

    for expected_remaining in ["1", "0", "0"] {
        let response = send(&app, Method::GET, uri, "203.0.113.7", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit"), Some("2"));
        assert_eq!(
            header(&response, "x-ratelimit-remaining"),
            Some(expected_remaining)
        );
    }

    let rejected = send(&app, Method::GET, uri, "203.0.113.7", None).await;
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&rejected, "x-ratelimit-remaining"), None);

    let retry_after_seconds = header(&rejected, "retry-after")
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or_default();
    assert!((299..=300).contains(&retry_after_seconds));

    let body = json_body(rejected).await;
    assert!(body["message"].is_string());
    let retry_after_ms = body["retryAfter"].as_i64().unwrap_or_default();
    assert!(retry_after_ms > 290_000 && retry_after_ms <= 300_000);
}

#[tokio::test]
async fn blocked_client_does_not_affect_other_clients() {
    let app = test_app(5, 1);
    let uri = "/api/rate-limits/status_lookup";

    for _ in 0..2 {
        send(&app, Method::GET, uri, "198.51.100.1", None).await;
    }
    let blocked = send(&app, Method::GET, uri, "198.51.100.1", None).await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = send(&app, Method::GET, uri, "198.51.100.2", None).await;
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(header(&other, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn self_service_status_reports_the_caller() {
    let app = test_app(5, 10);
    let uri = "/api/rate-limits/status_lookup";

    send(&app, Method::GET, uri, "192.0.2.10", None).await;
    let response = send(&app, Method::GET, uri, "192.0.2.10", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["clientId"], "192.0.2.10");
    assert_eq!(body["limitType"], "status_lookup");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["remaining"], 9);
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn repeated_bad_admin_tokens_block_the_caller() {
    let app = test_app(1, 10);
    let uri = "/api/admin/rate-limits/status_lookup/192.0.2.10";

    for _ in 0..2 {
        let response = send(&app, Method::GET, uri, "192.0.2.66", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let blocked = send(&app, Method::GET, uri, "192.0.2.66", Some(ADMIN_TOKEN)).await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(header(&blocked, "retry-after").is_some());

    let other_admin = send(&app, Method::GET, uri, "192.0.2.67", Some(ADMIN_TOKEN)).await;
    assert_eq!(other_admin.status(), StatusCode::OK);
}

#[tokio::test]
async fn successful_admin_calls_are_not_counted() {
    let app = test_app(1, 10);
    let uri = "/api/admin/rate-limits/status_lookup/192.0.2.10";

    for _ in 0..4 {
        let response = send(&app, Method::GET, uri, "192.0.2.66", Some(ADMIN_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn admin_can_inspect_and_reset_a_client() {
    let app = test_app(5, 1);
    let lookup_uri = "/api/rate-limits/status_lookup";
    let admin_uri = "/api/admin/rate-limits/status_lookup/203.0.113.50";

    for _ in 0..2 {
        send(&app, Method::GET, lookup_uri, "203.0.113.50", None).await;
    }

    let status = send(&app, Method::GET, admin_uri, "10.1.1.1", Some(ADMIN_TOKEN)).await;
    assert_eq!(status.status(), StatusCode::OK);
    let body = json_body(status).await;
    assert_eq!(body["attempts"], 2);
    assert_eq!(body["blocked"], true);
    assert!(body["retryAfter"].as_i64().unwrap_or_default() > 0);

    let reset = send(&app, Method::DELETE, admin_uri, "10.1.1.1", Some(ADMIN_TOKEN)).await;
    assert_eq!(reset.status(), StatusCode::OK);
    let body = json_body(reset).await;
    assert_eq!(body["deletedWindows"], 1);

    let unblocked = send(&app, Method::GET, lookup_uri, "203.0.113.50", None).await;
    assert_eq!(unblocked.status(), StatusCode::OK);
    assert_eq!(header(&unblocked, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn unknown_limit_type_is_not_found() {
    let app = test_app(5, 10);

    let admin = send(
        &app,
        Method::GET,
        "/api/admin/rate-limits/checkout/192.0.2.10",
        "10.1.1.1",
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(admin.status(), StatusCode::NOT_FOUND);

    let own = send(&app, Method::GET, "/api/rate-limits/checkout", "192.0.2.10", None).await;
    assert_eq!(own.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_disabled_postgres_for_memory_store() {
    let app = test_app(5, 10);

    let response = send(&app, Method::GET, "/health", "127.0.0.1", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], true);
    assert_eq!(body["postgres"]["status"], "disabled");
}
