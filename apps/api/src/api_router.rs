use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, middleware};

#[cfg(test)]
mod tests;

pub fn build_router(app_state: AppState) -> Router {
    let admin_routes = Router::new().route(
        "/api/admin/rate-limits/{limit_type}/{client_id}",
        get(handlers::rate_limits::admin_rate_limit_status_handler)
            .delete(handlers::rate_limits::admin_rate_limit_reset_handler),
    );

    let status_lookup_routes = Router::new()
        .route(
            "/api/rate-limits/{limit_type}",
            get(handlers::rate_limits::own_rate_limit_status_handler),
        )
        .route_layer(from_fn_with_state(
            app_state.limiters.status_lookup.clone(),
            middleware::throttle,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(admin_routes)
        .merge(status_lookup_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
