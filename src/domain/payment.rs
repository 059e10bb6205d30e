use crate::domain::canonical::{BillingType, PaymentStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub holder_name: String,
    pub number: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub cvv: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub address_number: Option<String>,
}

/// One gateway charge attempt. `amount_minor` is what the customer is
/// charged (gross minus discount); `net_amount_minor` is that minus the
/// gateway fee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub provider: String,
    pub provider_payment_id: String,
    pub billing_type: BillingType,
    pub status: PaymentStatus,
    pub gross_amount_minor: i64,
    pub discount_amount_minor: i64,
    pub amount_minor: i64,
    pub gateway_fee_minor: i64,
    pub net_amount_minor: i64,
    pub refunded_amount_minor: Option<i64>,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Api,
    Webhook,
    Poller,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Api => "api",
            TransactionSource::Webhook => "webhook",
            TransactionSource::Poller => "poller",
        }
    }
}

/// Append-only audit row.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub provider: String,
    pub source: TransactionSource,
    pub event_type: String,
    pub previous_status: Option<PaymentStatus>,
    pub new_status: Option<PaymentStatus>,
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn new(provider: &str, source: TransactionSource, event_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: None,
            enrollment_id: None,
            provider: provider.to_string(),
            source,
            event_type: event_type.to_string(),
            previous_status: None,
            new_status: None,
            raw_payload: None,
            created_at: Utc::now(),
        }
    }
}
