use crate::domain::canonical::{BillingType, PaymentStatus, WebhookEventType};
use crate::domain::money::GatewayFees;
use crate::domain::payment::CardDetails;
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod asaas;
pub mod mercadopago;
pub mod mock;
pub mod registry;
pub mod transport;

#[derive(Debug, Clone)]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    pub document: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub customer_id: String,
    pub customer: CustomerInput,
    pub amount_minor: i64,
    pub description: String,
    pub due_date: NaiveDate,
    /// Enrollment id; providers echo it back in webhooks.
    pub external_reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixArtifacts {
    pub qr_code_base64: Option<String>,
    pub copy_paste: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoletoArtifacts {
    pub barcode: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardArtifacts {
    pub receipt_url: Option<String>,
}

/// Gateway-agnostic snapshot of a charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPaymentResponse {
    pub gateway_payment_id: String,
    pub status: PaymentStatus,
    pub raw_status: String,
    pub gross_amount_minor: i64,
    pub net_amount_minor: Option<i64>,
    pub billing_type: BillingType,
    pub due_date: Option<NaiveDate>,
    pub invoice_url: Option<String>,
    pub pix: Option<PixArtifacts>,
    pub boleto: Option<BoletoArtifacts>,
    pub card: Option<CardArtifacts>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalWebhookEvent {
    pub provider: String,
    pub provider_event_id: Option<String>,
    pub provider_event_type: String,
    pub event_type: WebhookEventType,
    pub gateway_payment_id: String,
    pub customer_id: Option<String>,
    pub gross_amount_minor: Option<i64>,
    pub net_amount_minor: Option<i64>,
    pub status: PaymentStatus,
    pub raw_status: String,
    pub billing_type: Option<BillingType>,
    pub paid_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub raw_payload: Vec<u8>,
}

impl CanonicalWebhookEvent {
    /// Raw payload as JSON for the audit log; non-JSON bodies are kept as a
    /// lossy string.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.raw_payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&self.raw_payload).into_owned()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid charge request: {0}")]
    Validation(String),
    #[error("gateway timed out")]
    Timeout,
    #[error("gateway unavailable: HTTP {status}: {body}")]
    Unavailable { status: u16, body: String },
    #[error("gateway rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("gateway network error: {0}")]
    Network(String),
    #[error("gateway has no payment {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookParseError {
    /// Answered with 400.
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    /// Answered with 200 so the provider stops redelivering.
    #[error("unsupported webhook: {0}")]
    Unsupported(String),
    /// Follow-up fetch failed; answered with 500 so the provider retries.
    #[error("webhook enrichment failed: {0}")]
    Enrichment(#[from] GatewayError),
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Header names `validate_webhook_signature` and `parse_webhook_event`
    /// read. The HTTP layer forwards only these.
    fn signature_headers(&self) -> &'static [&'static str];

    async fn create_customer(&self, customer: &CustomerInput) -> Result<String, GatewayError>;

    async fn find_customer_by_document(&self, document: &str) -> Result<Option<String>, GatewayError>;

    async fn create_pix_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError>;

    async fn create_boleto_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError>;

    async fn create_card_payment(
        &self,
        request: &ChargeRequest,
        card: &CardDetails,
    ) -> Result<CanonicalPaymentResponse, GatewayError>;

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<CanonicalPaymentResponse, GatewayError>;

    async fn refund_payment(
        &self,
        gateway_payment_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<CanonicalPaymentResponse, GatewayError>;

    async fn cancel_payment(&self, gateway_payment_id: &str) -> Result<(), GatewayError>;

    async fn parse_webhook_event(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CanonicalWebhookEvent, WebhookParseError>;

    fn validate_webhook_signature(&self, headers: &HeaderMap, body: &[u8]) -> bool;

    fn fees(&self) -> GatewayFees;

    fn normalize_status(&self, provider_status: &str) -> PaymentStatus;
}

/// Dispatches to the billing-type specific charge call.
pub async fn create_charge(
    gateway: &dyn PaymentGateway,
    billing_type: BillingType,
    request: &ChargeRequest,
    card: Option<&CardDetails>,
) -> Result<CanonicalPaymentResponse, GatewayError> {
    match billing_type {
        BillingType::Pix => gateway.create_pix_payment(request).await,
        BillingType::Boleto => gateway.create_boleto_payment(request).await,
        BillingType::Card => {
            let card = card.ok_or_else(|| GatewayError::Validation("card details are required".to_string()))?;
            gateway.create_card_payment(request, card).await
        }
    }
}

pub(crate) fn validate_charge(request: &ChargeRequest) -> Result<(), GatewayError> {
    if request.amount_minor <= 0 {
        return Err(GatewayError::Validation("amount must be > 0".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_card(card: &CardDetails) -> Result<(), GatewayError> {
    if card.number.trim().is_empty() {
        return Err(GatewayError::Validation("card number is required".to_string()));
    }
    if card.cvv.trim().is_empty() {
        return Err(GatewayError::Validation("card cvv is required".to_string()));
    }
    Ok(())
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
