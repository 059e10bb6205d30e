use crate::http::handlers::{admin, checkout, gateways, ops, webhooks};
use crate::http::middleware::{admin_auth, rate_limit};
use crate::AppState;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

pub fn build_router(
    state: AppState,
    internal_api_key: String,
    checkout_rate_limit: Option<rate_limit::RateLimitState>,
) -> Router {
    let mut checkout_routes = Router::new()
        .route("/checkout", post(checkout::create_checkout))
        .route("/checkout/:enrollment_id/status", get(checkout::get_checkout_status));
    if let Some(limit) = checkout_rate_limit {
        checkout_routes = checkout_routes.layer(from_fn_with_state(limit, rate_limit::enforce));
    }

    let webhook_routes = Router::new()
        .route("/webhooks/:provider", post(webhooks::receive_webhook))
        .layer(DefaultBodyLimit::max(webhooks::MAX_WEBHOOK_BODY_BYTES));

    let admin_routes = Router::new()
        .route("/admin/payments/:payment_id/refund", post(admin::refund_payment))
        .route("/admin/payments/:payment_id/cancel", post(admin::cancel_payment))
        .layer(from_fn_with_state(
            internal_api_key,
            admin_auth::require_internal_api_key,
        ));

    Router::new()
        .route("/health", get(ops::health))
        .route("/ops/liveness", get(ops::liveness))
        .route("/gateways", get(gateways::list_gateways))
        .merge(checkout_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .with_state(state)
}
