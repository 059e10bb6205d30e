use crate::error::err;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use redis::AsyncCommands;

/// Fixed one-minute windows per client IP. Keys expire after two windows.
#[derive(Clone)]
pub struct RateLimitState {
    pub redis_client: redis::Client,
    pub max_per_minute: u64,
    pub scope: &'static str,
}

pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .split(',')
        .next()
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

pub async fn enforce(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers());
    let key = format!(
        "rate:{}:{}:{}",
        state.scope,
        ip,
        chrono::Utc::now().format("%Y%m%d%H%M")
    );

    // Fails open.
    match state.redis_client.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let count: u64 = conn.incr(&key, 1).await.unwrap_or(1);
            let _: bool = conn.expire(&key, 120).await.unwrap_or(false);
            if count > state.max_per_minute {
                tracing::warn!(ip = %ip, scope = state.scope, "rate limit exceeded");
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(err("RATE_LIMITED", "rate limit exceeded")),
                )
                    .into_response();
            }
        }
        Err(e) => tracing::debug!("rate limiter unavailable, allowing request: {}", e),
    }

    next.run(request).await
}
