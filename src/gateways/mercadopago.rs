use crate::domain::canonical::{BillingType, PaymentStatus, WebhookEventType};
use crate::domain::money::{from_major, to_major, GatewayFees};
use crate::domain::payment::CardDetails;
use crate::gateways::transport::send_json;
use crate::gateways::{
    header_str, validate_card, validate_charge, BoletoArtifacts, CanonicalPaymentResponse, CanonicalWebhookEvent,
    CardArtifacts, ChargeRequest, CustomerInput, GatewayError, PaymentGateway, PixArtifacts, WebhookParseError,
};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const NAME: &str = "mercadopago";
const SIGNATURE_HEADER: &str = "x-signature";
const REQUEST_ID_HEADER: &str = "x-request-id";

type HmacSha256 = Hmac<Sha256>;

pub struct MercadoPagoGateway {
    pub base_url: String,
    pub access_token: String,
    /// Secret for the `x-signature` HMAC. `None` disables webhook
    /// authentication.
    pub webhook_secret: Option<String>,
    pub fees: GatewayFees,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MpPayment {
    id: Value,
    status: String,
    status_detail: Option<String>,
    transaction_amount: f64,
    transaction_amount_refunded: Option<f64>,
    transaction_details: Option<MpTransactionDetails>,
    point_of_interaction: Option<MpPointOfInteraction>,
    barcode: Option<MpBarcode>,
    date_of_expiration: Option<String>,
    date_approved: Option<String>,
    external_reference: Option<String>,
    payment_type_id: Option<String>,
    payer: Option<MpPayer>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionDetails {
    net_received_amount: Option<f64>,
    external_resource_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpPointOfInteraction {
    transaction_data: Option<MpTransactionData>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpBarcode {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpPayer {
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MpNotification {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
    topic: Option<String>,
    action: Option<String>,
    data: Option<MpNotificationData>,
    resource: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpNotificationData {
    id: Value,
}

impl MpNotification {
    fn resource_id(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| value_to_id(&d.id))
            .or_else(|| self.resource.as_ref().and_then(|r| r.rsplit('/').next()).map(str::to_string))
    }

    fn topic(&self) -> &str {
        self.kind.as_deref().or(self.topic.as_deref()).unwrap_or("")
    }
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    results: Vec<IdRef>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: Value,
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn identification(document: &str) -> Value {
    let digits: String = document.chars().filter(|c| c.is_ascii_digit()).collect();
    let kind = if digits.len() == 14 { "CNPJ" } else { "CPF" };
    json!({ "type": kind, "number": digits })
}

fn split_name(full: &str) -> (String, String) {
    let mut parts = full.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").to_string();
    let last = parts.next().unwrap_or("").trim().to_string();
    (first, last)
}

fn card_brand(number: &str) -> Option<&'static str> {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let prefix2: u32 = digits.get(..2)?.parse().ok()?;
    let prefix4: u32 = digits.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);
    match prefix2 {
        34 | 37 => Some("amex"),
        51..=55 => Some("master"),
        _ if (2221..=2720).contains(&prefix4) => Some("master"),
        40..=49 => Some("visa"),
        _ => None,
    }
}

/// `x-signature` looks like `ts=1704908010,v1=618c85...`.
fn parse_signature(header: &str) -> Option<(String, String)> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        let (k, v) = part.trim().split_once('=')?;
        match k.trim() {
            "ts" => ts = Some(v.trim().to_string()),
            "v1" => v1 = Some(v.trim().to_string()),
            _ => {}
        }
    }
    Some((ts?, v1?))
}

impl MercadoPagoGateway {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    async fn create_payment(&self, request: &ChargeRequest, method: Value) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_charge(request)?;
        let (first_name, last_name) = split_name(&request.customer.name);
        let mut body = json!({
            "transaction_amount": to_major(request.amount_minor),
            "description": request.description,
            "external_reference": request.external_reference,
            "date_of_expiration": request.due_date.format("%Y-%m-%dT23:59:59.000-03:00").to_string(),
            "payer": {
                "email": request.customer.email,
                "first_name": first_name,
                "last_name": last_name,
                "identification": identification(&request.customer.document),
            },
        });
        if let (Some(target), Some(fields)) = (body.as_object_mut(), method.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }

        let req = self
            .authed(self.client.post(self.url("/v1/payments")))
            .header("X-Idempotency-Key", Uuid::new_v4().to_string())
            .json(&body);
        let payment: MpPayment = send_json(req).await?;
        Ok(self.to_canonical(payment))
    }

    async fn card_token(&self, request: &ChargeRequest, card: &CardDetails) -> Result<String, GatewayError> {
        let body = json!({
            "card_number": card.number,
            "security_code": card.cvv,
            "expiration_month": card.expiry_month,
            "expiration_year": card.expiry_year,
            "cardholder": {
                "name": card.holder_name,
                "identification": identification(&request.customer.document),
            },
        });
        let token: IdRef = send_json(self.authed(self.client.post(self.url("/v1/card_tokens"))).json(&body)).await?;
        value_to_id(&token.id).ok_or_else(|| GatewayError::Decode("card token without id".to_string()))
    }

    async fn search_customer(&self, field: &str, value: &str) -> Result<Option<String>, GatewayError> {
        let req = self
            .authed(self.client.get(self.url("/v1/customers/search")))
            .query(&[(field, value)]);
        let found: SearchResults = send_json(req).await?;
        Ok(found.results.iter().find_map(|r| value_to_id(&r.id)))
    }

    fn status_of(&self, status: &str, detail: Option<&str>) -> PaymentStatus {
        if status == "cancelled" && detail == Some("expired") {
            return PaymentStatus::Overdue;
        }
        self.normalize_status(status)
    }

    fn to_canonical(&self, p: MpPayment) -> CanonicalPaymentResponse {
        let billing_type = match p.payment_type_id.as_deref() {
            Some("ticket") => BillingType::Boleto,
            Some("credit_card") | Some("debit_card") => BillingType::Card,
            _ => BillingType::Pix,
        };
        let details = p.transaction_details.as_ref();
        let tx_data = p.point_of_interaction.and_then(|poi| poi.transaction_data);

        let pix = (billing_type == BillingType::Pix).then(|| PixArtifacts {
            qr_code_base64: tx_data.as_ref().and_then(|d| d.qr_code_base64.clone()),
            copy_paste: tx_data.as_ref().and_then(|d| d.qr_code.clone()),
            expires_at: p.date_of_expiration.clone(),
        });
        let boleto = (billing_type == BillingType::Boleto).then(|| BoletoArtifacts {
            barcode: p.barcode.as_ref().and_then(|b| b.content.clone()),
            url: details.and_then(|d| d.external_resource_url.clone()),
        });
        // Mercado Pago has no hosted card receipt; the ticket URL is the
        // closest thing it returns.
        let card = (billing_type == BillingType::Card).then(|| CardArtifacts {
            receipt_url: tx_data.as_ref().and_then(|d| d.ticket_url.clone()),
        });

        CanonicalPaymentResponse {
            gateway_payment_id: value_to_id(&p.id).unwrap_or_default(),
            status: self.status_of(&p.status, p.status_detail.as_deref()),
            raw_status: p.status,
            gross_amount_minor: from_major(p.transaction_amount),
            net_amount_minor: details.and_then(|d| d.net_received_amount).map(from_major),
            billing_type,
            due_date: p
                .date_of_expiration
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.date_naive()),
            invoice_url: tx_data.as_ref().and_then(|d| d.ticket_url.clone()),
            pix,
            boleto,
            card,
        }
    }

    async fn fetch_payment(&self, gateway_payment_id: &str) -> Result<MpPayment, GatewayError> {
        let req = self.authed(self.client.get(self.url(&format!("/v1/payments/{}", gateway_payment_id))));
        send_json(req).await
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature_headers(&self) -> &'static [&'static str] {
        &[SIGNATURE_HEADER, REQUEST_ID_HEADER]
    }

    async fn create_customer(&self, customer: &CustomerInput) -> Result<String, GatewayError> {
        if let Some(id) = self.find_customer_by_document(&customer.document).await? {
            return Ok(id);
        }
        if let Some(id) = self.search_customer("email", &customer.email).await? {
            return Ok(id);
        }

        let (first_name, last_name) = split_name(&customer.name);
        let body = json!({
            "email": customer.email,
            "first_name": first_name,
            "last_name": last_name,
            "identification": identification(&customer.document),
        });
        let created: IdRef = send_json(self.authed(self.client.post(self.url("/v1/customers"))).json(&body)).await?;
        value_to_id(&created.id).ok_or_else(|| GatewayError::Decode("customer without id".to_string()))
    }

    async fn find_customer_by_document(&self, document: &str) -> Result<Option<String>, GatewayError> {
        let digits: String = document.chars().filter(|c| c.is_ascii_digit()).collect();
        self.search_customer("identification.number", &digits).await
    }

    async fn create_pix_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.create_payment(request, json!({ "payment_method_id": "pix" })).await
    }

    async fn create_boleto_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.create_payment(request, json!({ "payment_method_id": "bolbradesco" })).await
    }

    async fn create_card_payment(
        &self,
        request: &ChargeRequest,
        card: &CardDetails,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_card(card)?;
        validate_charge(request)?;
        let brand = card_brand(&card.number)
            .ok_or_else(|| GatewayError::Validation("unsupported card brand".to_string()))?;
        let token = self.card_token(request, card).await?;
        self.create_payment(
            request,
            json!({ "payment_method_id": brand, "token": token, "installments": 1 }),
        )
        .await
    }

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<CanonicalPaymentResponse, GatewayError> {
        let payment = self.fetch_payment(gateway_payment_id).await?;
        Ok(self.to_canonical(payment))
    }

    async fn refund_payment(
        &self,
        gateway_payment_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        let body = match amount_minor {
            Some(v) => json!({ "amount": to_major(v) }),
            None => json!({}),
        };
        let req = self
            .authed(self.client.post(self.url(&format!("/v1/payments/{}/refunds", gateway_payment_id))))
            .header("X-Idempotency-Key", Uuid::new_v4().to_string())
            .json(&body);
        let _: Value = send_json(req).await?;
        self.get_payment(gateway_payment_id).await
    }

    async fn cancel_payment(&self, gateway_payment_id: &str) -> Result<(), GatewayError> {
        let req = self
            .authed(self.client.put(self.url(&format!("/v1/payments/{}", gateway_payment_id))))
            .json(&json!({ "status": "cancelled" }));
        let _: Value = send_json(req).await?;
        Ok(())
    }

    /// Notifications carry only the payment id, so the payment is fetched
    /// before the event is built.
    async fn parse_webhook_event(
        &self,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CanonicalWebhookEvent, WebhookParseError> {
        let note: MpNotification =
            serde_json::from_slice(body).map_err(|e| WebhookParseError::Malformed(e.to_string()))?;
        if note.topic() != "payment" {
            return Err(WebhookParseError::Unsupported(format!("topic '{}'", note.topic())));
        }
        let payment_id = note
            .resource_id()
            .ok_or_else(|| WebhookParseError::Malformed("missing data.id".to_string()))?;

        let payment = self.fetch_payment(&payment_id).await?;
        let status = self.status_of(&payment.status, payment.status_detail.as_deref());
        let paid_at = payment
            .date_approved
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        let provider_event_type = note.action.clone().unwrap_or_else(|| note.topic().to_string());
        let customer_id = payment.payer.as_ref().and_then(|p| p.id.as_ref()).and_then(value_to_id);
        let external_reference = payment.external_reference.clone();
        let refunded = payment.transaction_amount_refunded.filter(|v| *v > 0.0).map(from_major);
        let canonical = self.to_canonical(payment);

        let event_type = match status {
            PaymentStatus::Confirmed => WebhookEventType::PaymentConfirmed,
            PaymentStatus::Overdue => WebhookEventType::PaymentOverdue,
            PaymentStatus::Refunded => WebhookEventType::PaymentRefunded,
            PaymentStatus::Cancelled => WebhookEventType::PaymentDeleted,
            PaymentStatus::Chargeback => WebhookEventType::PaymentChargeback,
            PaymentStatus::Pending if note.action.as_deref() == Some("payment.created") => {
                WebhookEventType::PaymentCreated
            }
            PaymentStatus::Pending => WebhookEventType::PaymentUpdated,
            PaymentStatus::Failed => WebhookEventType::PaymentFailed,
        };
        let gross = if event_type == WebhookEventType::PaymentRefunded {
            refunded.or(Some(canonical.gross_amount_minor))
        } else {
            Some(canonical.gross_amount_minor)
        };

        Ok(CanonicalWebhookEvent {
            provider: NAME.to_string(),
            provider_event_id: note.id.as_ref().and_then(value_to_id),
            provider_event_type,
            event_type,
            gateway_payment_id: canonical.gateway_payment_id,
            customer_id,
            gross_amount_minor: gross,
            net_amount_minor: canonical.net_amount_minor,
            status,
            raw_status: canonical.raw_status,
            billing_type: Some(canonical.billing_type),
            paid_at,
            external_reference,
            raw_payload: body.to_vec(),
        })
    }

    fn validate_webhook_signature(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        let secret = match self.webhook_secret.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => {
                tracing::warn!("mercadopago webhook secret not configured; accepting unsigned webhook");
                return true;
            }
        };

        let Some((ts, v1)) = header_str(headers, SIGNATURE_HEADER).and_then(parse_signature) else {
            return false;
        };
        let Ok(provided) = hex::decode(v1) else {
            return false;
        };
        let data_id = serde_json::from_slice::<MpNotification>(body)
            .ok()
            .and_then(|n| n.resource_id())
            .unwrap_or_default();
        let data_id = if data_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            data_id.to_lowercase()
        } else {
            data_id
        };
        let request_id = header_str(headers, REQUEST_ID_HEADER).unwrap_or("");

        let mut manifest = String::new();
        if !data_id.is_empty() {
            manifest.push_str(&format!("id:{};", data_id));
        }
        if !request_id.is_empty() {
            manifest.push_str(&format!("request-id:{};", request_id));
        }
        manifest.push_str(&format!("ts:{};", ts));

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(manifest.as_bytes());
        let expected = mac.finalize().into_bytes();
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    fn fees(&self) -> GatewayFees {
        self.fees
    }

    fn normalize_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "pending" | "in_process" | "authorized" => PaymentStatus::Pending,
            "approved" => PaymentStatus::Confirmed,
            "refunded" => PaymentStatus::Refunded,
            "cancelled" => PaymentStatus::Cancelled,
            "charged_back" | "in_mediation" => PaymentStatus::Chargeback,
            "rejected" => PaymentStatus::Failed,
            _ => PaymentStatus::Failed,
        }
    }
}
