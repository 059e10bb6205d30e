use crate::domain::canonical::{BillingType, PaymentStatus, WebhookEventType};
use crate::domain::money::GatewayFees;
use crate::domain::payment::CardDetails;
use crate::gateways::{
    header_str, validate_card, validate_charge, BoletoArtifacts, CanonicalPaymentResponse, CanonicalWebhookEvent,
    CardArtifacts, ChargeRequest, CustomerInput, GatewayError, PaymentGateway, PixArtifacts, WebhookParseError,
};
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub const NAME: &str = "mock";
const TOKEN_HEADER: &str = "x-mock-webhook-token";

/// In-process gateway for local runs and tests. Charges live in memory;
/// `behavior` is `ALWAYS_SUCCESS`, `ALWAYS_FAILURE` or `ALWAYS_TIMEOUT`.
pub struct MockGateway {
    pub behavior: String,
    pub webhook_token: Option<String>,
    pub fees: GatewayFees,
    payments: Mutex<HashMap<String, CanonicalPaymentResponse>>,
    customers: Mutex<HashMap<String, String>>,
}

/// `{ "id": "evt_1", "event": "payment_confirmed", "payment_id": "mock_pay_..." }`
#[derive(Debug, Deserialize)]
struct MockWebhook {
    id: Option<String>,
    event: String,
    payment_id: String,
    #[serde(default)]
    amount_minor: Option<i64>,
    #[serde(default)]
    external_reference: Option<String>,
}

impl MockGateway {
    pub fn new(behavior: &str, webhook_token: Option<String>, fees: GatewayFees) -> Self {
        Self {
            behavior: behavior.to_string(),
            webhook_token,
            fees,
            payments: Mutex::new(HashMap::new()),
            customers: Mutex::new(HashMap::new()),
        }
    }

    /// Moves a stored charge to `status`, the way a customer paying or a
    /// provider expiring it would.
    pub fn set_status(&self, gateway_payment_id: &str, status: PaymentStatus) -> bool {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        match payments.get_mut(gateway_payment_id) {
            Some(p) => {
                p.status = status;
                p.raw_status = status.as_str().to_string();
                true
            }
            None => false,
        }
    }

    fn charge(&self, request: &ChargeRequest, billing_type: BillingType) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_charge(request)?;
        match self.behavior.as_str() {
            "ALWAYS_FAILURE" => {
                return Err(GatewayError::Rejected {
                    status: 402,
                    body: "mock decline".to_string(),
                })
            }
            "ALWAYS_TIMEOUT" => return Err(GatewayError::Timeout),
            _ => {}
        }

        let id = format!("mock_pay_{}", uuid::Uuid::new_v4().simple());
        let resp = CanonicalPaymentResponse {
            gateway_payment_id: id.clone(),
            status: PaymentStatus::Pending,
            raw_status: "pending".to_string(),
            gross_amount_minor: request.amount_minor,
            net_amount_minor: None,
            billing_type,
            due_date: Some(request.due_date),
            invoice_url: Some(format!("https://mock.local/invoices/{}", id)),
            pix: (billing_type == BillingType::Pix).then(|| PixArtifacts {
                qr_code_base64: Some("iVBORw0KGgo=".to_string()),
                copy_paste: Some(format!("00020126mock{}", id)),
                expires_at: Some(request.due_date.format("%Y-%m-%d 23:59:59").to_string()),
            }),
            boleto: (billing_type == BillingType::Boleto).then(|| BoletoArtifacts {
                barcode: Some("23793381286000000000000000000000000000000000".to_string()),
                url: Some(format!("https://mock.local/boletos/{}", id)),
            }),
            card: (billing_type == BillingType::Card).then(|| CardArtifacts {
                receipt_url: Some(format!("https://mock.local/receipts/{}", id)),
            }),
        };

        self.payments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, resp.clone());
        Ok(resp)
    }

    fn stored(&self, gateway_payment_id: &str) -> Option<CanonicalPaymentResponse> {
        self.payments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(gateway_payment_id)
            .cloned()
    }
}

fn event_from_mock(event: &str) -> WebhookEventType {
    match event {
        "payment_created" => WebhookEventType::PaymentCreated,
        "payment_updated" => WebhookEventType::PaymentUpdated,
        "payment_confirmed" => WebhookEventType::PaymentConfirmed,
        "payment_overdue" => WebhookEventType::PaymentOverdue,
        "payment_refunded" => WebhookEventType::PaymentRefunded,
        "payment_deleted" => WebhookEventType::PaymentDeleted,
        "payment_chargeback" => WebhookEventType::PaymentChargeback,
        "payment_failed" => WebhookEventType::PaymentFailed,
        _ => WebhookEventType::Unknown,
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature_headers(&self) -> &'static [&'static str] {
        &[TOKEN_HEADER]
    }

    async fn create_customer(&self, customer: &CustomerInput) -> Result<String, GatewayError> {
        if let Some(id) = self.find_customer_by_document(&customer.document).await? {
            return Ok(id);
        }
        let id = format!("mock_cus_{}", uuid::Uuid::new_v4().simple());
        self.customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(customer.document.clone(), id.clone());
        Ok(id)
    }

    async fn find_customer_by_document(&self, document: &str) -> Result<Option<String>, GatewayError> {
        Ok(self
            .customers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(document)
            .cloned())
    }

    async fn create_pix_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.charge(request, BillingType::Pix)
    }

    async fn create_boleto_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.charge(request, BillingType::Boleto)
    }

    async fn create_card_payment(
        &self,
        request: &ChargeRequest,
        card: &CardDetails,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_card(card)?;
        self.charge(request, BillingType::Card)
    }

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.stored(gateway_payment_id)
            .ok_or_else(|| GatewayError::NotFound(gateway_payment_id.to_string()))
    }

    async fn refund_payment(
        &self,
        gateway_payment_id: &str,
        _amount_minor: Option<i64>,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        if !self.set_status(gateway_payment_id, PaymentStatus::Refunded) {
            return Err(GatewayError::NotFound(gateway_payment_id.to_string()));
        }
        self.get_payment(gateway_payment_id).await
    }

    async fn cancel_payment(&self, gateway_payment_id: &str) -> Result<(), GatewayError> {
        if !self.set_status(gateway_payment_id, PaymentStatus::Cancelled) {
            return Err(GatewayError::NotFound(gateway_payment_id.to_string()));
        }
        Ok(())
    }

    async fn parse_webhook_event(
        &self,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CanonicalWebhookEvent, WebhookParseError> {
        let hook: MockWebhook =
            serde_json::from_slice(body).map_err(|e| WebhookParseError::Malformed(e.to_string()))?;
        let event_type = event_from_mock(&hook.event);
        let stored = self.stored(&hook.payment_id);
        let status = match event_type {
            WebhookEventType::PaymentConfirmed => PaymentStatus::Confirmed,
            WebhookEventType::PaymentOverdue => PaymentStatus::Overdue,
            WebhookEventType::PaymentRefunded => PaymentStatus::Refunded,
            WebhookEventType::PaymentDeleted => PaymentStatus::Cancelled,
            WebhookEventType::PaymentChargeback => PaymentStatus::Chargeback,
            WebhookEventType::PaymentFailed => PaymentStatus::Failed,
            _ => stored.as_ref().map(|p| p.status).unwrap_or(PaymentStatus::Pending),
        };

        Ok(CanonicalWebhookEvent {
            provider: NAME.to_string(),
            provider_event_id: hook.id,
            provider_event_type: hook.event,
            event_type,
            gross_amount_minor: hook.amount_minor.or(stored.as_ref().map(|p| p.gross_amount_minor)),
            net_amount_minor: None,
            status,
            raw_status: status.as_str().to_string(),
            billing_type: stored.as_ref().map(|p| p.billing_type),
            paid_at: (status == PaymentStatus::Confirmed).then(Utc::now),
            external_reference: hook.external_reference,
            customer_id: None,
            gateway_payment_id: hook.payment_id,
            raw_payload: body.to_vec(),
        })
    }

    fn validate_webhook_signature(&self, headers: &HeaderMap, _body: &[u8]) -> bool {
        match self.webhook_token.as_deref() {
            Some(t) if !t.is_empty() => header_str(headers, TOKEN_HEADER) == Some(t),
            _ => true,
        }
    }

    fn fees(&self) -> GatewayFees {
        self.fees
    }

    fn normalize_status(&self, provider_status: &str) -> PaymentStatus {
        PaymentStatus::parse(provider_status)
    }
}
