use crate::domain::canonical::{BillingType, PaymentStatus, WebhookEventType};
use crate::domain::money::{from_major, to_major, GatewayFees};
use crate::domain::payment::CardDetails;
use crate::gateways::transport::send_json;
use crate::gateways::{
    header_str, validate_card, validate_charge, BoletoArtifacts, CanonicalPaymentResponse, CanonicalWebhookEvent,
    CardArtifacts, ChargeRequest, CustomerInput, GatewayError, PaymentGateway, PixArtifacts, WebhookParseError,
};
use axum::http::HeaderMap;
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;

pub const NAME: &str = "asaas";
const TOKEN_HEADER: &str = "asaas-access-token";

pub struct AsaasGateway {
    pub base_url: String,
    pub api_key: String,
    /// Shared token Asaas echoes in `asaas-access-token`. `None` disables
    /// webhook authentication.
    pub webhook_token: Option<String>,
    pub fees: GatewayFees,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsaasPayment {
    id: String,
    customer: Option<String>,
    status: String,
    value: f64,
    net_value: Option<f64>,
    billing_type: Option<String>,
    due_date: Option<String>,
    invoice_url: Option<String>,
    bank_slip_url: Option<String>,
    transaction_receipt_url: Option<String>,
    external_reference: Option<String>,
    payment_date: Option<String>,
    confirmed_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsaasWebhook {
    id: Option<String>,
    event: String,
    payment: Option<AsaasPayment>,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<CustomerRef>,
}

#[derive(Debug, Deserialize)]
struct CustomerRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PixQrCode {
    encoded_image: Option<String>,
    payload: Option<String>,
    expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentificationField {
    identification_field: Option<String>,
}

impl AsaasGateway {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).header("access_token", &self.api_key)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).header("access_token", &self.api_key)
    }

    async fn find_customer(&self, field: &str, value: &str) -> Result<Option<String>, GatewayError> {
        let list: CustomerList = send_json(self.get("/customers").query(&[(field, value)])).await?;
        Ok(list.data.into_iter().next().map(|c| c.id))
    }

    async fn create_payment(
        &self,
        request: &ChargeRequest,
        billing_type: &str,
        extra: serde_json::Value,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_charge(request)?;
        let mut body = json!({
            "customer": request.customer_id,
            "billingType": billing_type,
            "value": to_major(request.amount_minor),
            "dueDate": request.due_date.format("%Y-%m-%d").to_string(),
            "description": request.description,
            "externalReference": request.external_reference,
        });
        if let (Some(target), Some(fields)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }

        let payment: AsaasPayment = send_json(self.post("/payments").json(&body)).await?;
        let mut resp = self.to_canonical(payment);
        self.attach_artifacts(&mut resp).await;
        Ok(resp)
    }

    /// Pix QR code and boleto barcode live behind separate endpoints. A
    /// failure here leaves the artifact empty; status polls fetch it again.
    async fn attach_artifacts(&self, resp: &mut CanonicalPaymentResponse) {
        if resp.status != PaymentStatus::Pending {
            return;
        }
        match resp.billing_type {
            BillingType::Pix => {
                let path = format!("/payments/{}/pixQrCode", resp.gateway_payment_id);
                match send_json::<PixQrCode>(self.get(&path)).await {
                    Ok(qr) => {
                        resp.pix = Some(PixArtifacts {
                            qr_code_base64: qr.encoded_image,
                            copy_paste: qr.payload,
                            expires_at: qr.expiration_date,
                        })
                    }
                    Err(e) => tracing::warn!(gateway_payment_id = %resp.gateway_payment_id, "asaas pix qr fetch failed: {}", e),
                }
            }
            BillingType::Boleto => {
                let path = format!("/payments/{}/identificationField", resp.gateway_payment_id);
                match send_json::<IdentificationField>(self.get(&path)).await {
                    Ok(field) => {
                        if let Some(boleto) = resp.boleto.as_mut() {
                            boleto.barcode = field.identification_field;
                        }
                    }
                    Err(e) => tracing::warn!(gateway_payment_id = %resp.gateway_payment_id, "asaas barcode fetch failed: {}", e),
                }
            }
            BillingType::Card => {}
        }
    }

    fn to_canonical(&self, p: AsaasPayment) -> CanonicalPaymentResponse {
        let billing_type = p.billing_type.as_deref().map(billing_from_asaas).unwrap_or(BillingType::Pix);
        let boleto = (billing_type == BillingType::Boleto).then(|| BoletoArtifacts {
            barcode: None,
            url: p.bank_slip_url.clone(),
        });
        let card = (billing_type == BillingType::Card).then(|| CardArtifacts {
            receipt_url: p.transaction_receipt_url.clone(),
        });

        CanonicalPaymentResponse {
            gateway_payment_id: p.id,
            status: self.normalize_status(&p.status),
            raw_status: p.status,
            gross_amount_minor: from_major(p.value),
            net_amount_minor: p.net_value.map(from_major),
            billing_type,
            due_date: p.due_date.as_deref().and_then(parse_date),
            invoice_url: p.invoice_url,
            pix: None,
            boleto,
            card,
        }
    }
}

fn billing_from_asaas(s: &str) -> BillingType {
    match s {
        "BOLETO" => BillingType::Boleto,
        "CREDIT_CARD" | "DEBIT_CARD" => BillingType::Card,
        _ => BillingType::Pix,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn event_from_asaas(event: &str) -> WebhookEventType {
    match event {
        "PAYMENT_CREATED" => WebhookEventType::PaymentCreated,
        "PAYMENT_UPDATED" | "PAYMENT_AWAITING_RISK_ANALYSIS" | "PAYMENT_APPROVED_BY_RISK_ANALYSIS" => {
            WebhookEventType::PaymentUpdated
        }
        "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" => WebhookEventType::PaymentConfirmed,
        "PAYMENT_OVERDUE" => WebhookEventType::PaymentOverdue,
        "PAYMENT_REFUNDED" => WebhookEventType::PaymentRefunded,
        "PAYMENT_DELETED" => WebhookEventType::PaymentDeleted,
        "PAYMENT_CHARGEBACK_REQUESTED" | "PAYMENT_CHARGEBACK_DISPUTE" => WebhookEventType::PaymentChargeback,
        _ => WebhookEventType::Unknown,
    }
}

#[async_trait::async_trait]
impl PaymentGateway for AsaasGateway {
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
        if !customer.email.is_empty() {
            if let Some(id) = self.find_customer("email", &customer.email).await? {
                return Ok(id);
            }
        }

        let body = json!({
            "name": customer.name,
            "email": customer.email,
            "cpfCnpj": customer.document,
            "mobilePhone": customer.phone,
            "notificationDisabled": true,
        });
        let created: CustomerRef = send_json(self.post("/customers").json(&body)).await?;
        Ok(created.id)
    }

    async fn find_customer_by_document(&self, document: &str) -> Result<Option<String>, GatewayError> {
        self.find_customer("cpfCnpj", document).await
    }

    async fn create_pix_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.create_payment(request, "PIX", json!({})).await
    }

    async fn create_boleto_payment(&self, request: &ChargeRequest) -> Result<CanonicalPaymentResponse, GatewayError> {
        self.create_payment(request, "BOLETO", json!({})).await
    }

    async fn create_card_payment(
        &self,
        request: &ChargeRequest,
        card: &CardDetails,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        validate_card(card)?;
        let extra = json!({
            "creditCard": {
                "holderName": card.holder_name,
                "number": card.number,
                "expiryMonth": format!("{:02}", card.expiry_month),
                "expiryYear": card.expiry_year.to_string(),
                "ccv": card.cvv,
            },
            "creditCardHolderInfo": {
                "name": card.holder_name,
                "email": request.customer.email,
                "cpfCnpj": request.customer.document,
                "postalCode": card.postal_code.clone().unwrap_or_default(),
                "addressNumber": card.address_number.clone().unwrap_or_default(),
                "phone": request.customer.phone.clone().unwrap_or_default(),
            },
        });
        self.create_payment(request, "CREDIT_CARD", extra).await
    }

    async fn get_payment(&self, gateway_payment_id: &str) -> Result<CanonicalPaymentResponse, GatewayError> {
        let payment: AsaasPayment = send_json(self.get(&format!("/payments/{}", gateway_payment_id))).await?;
        let mut resp = self.to_canonical(payment);
        self.attach_artifacts(&mut resp).await;
        Ok(resp)
    }

    async fn refund_payment(
        &self,
        gateway_payment_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<CanonicalPaymentResponse, GatewayError> {
        let body = match amount_minor {
            Some(v) => json!({ "value": to_major(v) }),
            None => json!({}),
        };
        let path = format!("/payments/{}/refund", gateway_payment_id);
        let payment: AsaasPayment = send_json(self.post(&path).json(&body)).await?;
        Ok(self.to_canonical(payment))
    }

    async fn cancel_payment(&self, gateway_payment_id: &str) -> Result<(), GatewayError> {
        let request = self
            .client
            .delete(self.url(&format!("/payments/{}", gateway_payment_id)))
            .header("access_token", &self.api_key);
        let _: serde_json::Value = send_json(request).await?;
        Ok(())
    }

    async fn parse_webhook_event(
        &self,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CanonicalWebhookEvent, WebhookParseError> {
        let hook: AsaasWebhook =
            serde_json::from_slice(body).map_err(|e| WebhookParseError::Malformed(e.to_string()))?;
        let payment = hook
            .payment
            .ok_or_else(|| WebhookParseError::Malformed("missing payment object".to_string()))?;

        let paid_at = payment
            .confirmed_date
            .as_deref()
            .or(payment.payment_date.as_deref())
            .and_then(parse_date)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Utc.from_utc_datetime(&dt));

        Ok(CanonicalWebhookEvent {
            provider: NAME.to_string(),
            provider_event_id: hook.id,
            event_type: event_from_asaas(&hook.event),
            provider_event_type: hook.event,
            gateway_payment_id: payment.id,
            customer_id: payment.customer,
            gross_amount_minor: Some(from_major(payment.value)),
            net_amount_minor: payment.net_value.map(from_major),
            status: self.normalize_status(&payment.status),
            raw_status: payment.status,
            billing_type: payment.billing_type.as_deref().map(billing_from_asaas),
            paid_at,
            external_reference: payment.external_reference,
            raw_payload: body.to_vec(),
        })
    }

    fn validate_webhook_signature(&self, headers: &HeaderMap, _body: &[u8]) -> bool {
        let expected = match self.webhook_token.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => {
                tracing::warn!("asaas webhook token not configured; accepting unauthenticated webhook");
                return true;
            }
        };
        let provided = header_str(headers, TOKEN_HEADER).unwrap_or("");
        provided.as_bytes().ct_eq(expected.as_bytes()).into()
    }

    fn fees(&self) -> GatewayFees {
        self.fees
    }

    fn normalize_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "PENDING" | "AWAITING_RISK_ANALYSIS" => PaymentStatus::Pending,
            "RECEIVED" | "CONFIRMED" | "RECEIVED_IN_CASH" | "DUNNING_RECEIVED" => PaymentStatus::Confirmed,
            "REFUND_REQUESTED" | "REFUND_IN_PROGRESS" => PaymentStatus::Confirmed,
            "OVERDUE" | "DUNNING_REQUESTED" => PaymentStatus::Overdue,
            "REFUNDED" => PaymentStatus::Refunded,
            "DELETED" => PaymentStatus::Cancelled,
            "CHARGEBACK_REQUESTED" | "CHARGEBACK_DISPUTE" | "AWAITING_CHARGEBACK_REVERSAL" => PaymentStatus::Chargeback,
            _ => PaymentStatus::Failed,
        }
    }
}
