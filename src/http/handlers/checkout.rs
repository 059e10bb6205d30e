use crate::domain::checkout::CheckoutRequest;
use crate::error::AppError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let resp = state.checkout.create_checkout(req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn get_checkout_status(
    State(state): State<AppState>,
    Path(enrollment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let resp = state.checkout.get_checkout_status(enrollment_id).await?;
    Ok((StatusCode::OK, Json(resp)))
}
