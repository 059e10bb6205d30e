use crate::error::AppError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Partial refund; the whole charge when absent.
    #[serde(default)]
    pub amount_minor: Option<i64>,
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let resp = state.admin.refund(payment_id, req.amount_minor).await?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let resp = state.admin.cancel(payment_id).await?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}
