use crate::error::AppError;
use crate::service::webhook_reconciler::WebhookOutcome;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

/// Larger bodies are answered with 413 before the provider is resolved.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

fn outcome_name(outcome: &WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Applied { .. } => "applied",
        WebhookOutcome::Stale { .. } => "stale",
        WebhookOutcome::Ignored { .. } => "ignored",
        WebhookOutcome::NoMatch { .. } => "no_match",
        WebhookOutcome::Unsupported(_) => "unsupported",
    }
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.reconciler.handle(&provider, &headers, &body).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "received": true,
            "outcome": outcome_name(&outcome),
            "message": outcome.message(),
        })),
    ))
}
