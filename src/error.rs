use crate::domain::money::MoneyError;
use crate::gateways::registry::UnknownGateway;
use crate::gateways::GatewayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

pub fn err(code: &str, message: &str) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input; never retried.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid webhook signature")]
    Signature,
    /// The remote charge call failed; the caller resubmits.
    #[error(transparent)]
    Provider(GatewayError),
    /// Store failure while applying a webhook; the provider redelivers.
    #[error("reconciliation failed: {0:#}")]
    Reconciliation(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Validation(msg) => AppError::Validation(msg),
            other => AppError::Provider(other),
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(e: MoneyError) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

impl From<UnknownGateway> for AppError {
    fn from(e: UnknownGateway) -> Self {
        AppError::NotFound(e.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Signature => StatusCode::UNAUTHORIZED,
            AppError::Provider(_) | AppError::Reconciliation(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Signature => "INVALID_SIGNATURE",
            AppError::Provider(_) => "PROVIDER_ERROR",
            AppError::Reconciliation(_) => "RECONCILIATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {:#}", self);
        }
        (status, Json(err(self.code(), &self.to_string()))).into_response()
    }
}
