use crate::domain::canonical::{BillingType, EnrollmentStatus, PaymentStatus};
use crate::domain::money::SplitBreakdown;
use crate::domain::payment::CardDetails;
use crate::gateways::{BoletoArtifacts, CardArtifacts, PixArtifacts};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutRequest {
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub student_document: String,
    #[serde(default)]
    pub student_phone: Option<String>,
    pub course_id: String,
    pub course_title: String,
    #[serde(default)]
    pub instructor_id: Option<String>,
    pub amount_minor: i64,
    #[serde(default)]
    pub discount_code: Option<String>,
    /// `pix`, `boleto` or `card`; kept as text so a bad value is a 400.
    pub payment_method: String,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub enrollment_id: Uuid,
    pub payment_id: Uuid,
    pub provider: String,
    pub gateway_payment_id: String,
    pub status: PaymentStatus,
    pub billing_type: BillingType,
    pub gross_amount_minor: i64,
    pub discount_amount_minor: i64,
    pub final_amount_minor: i64,
    pub due_date: NaiveDate,
    pub invoice_url: Option<String>,
    pub pix: Option<PixArtifacts>,
    pub boleto: Option<BoletoArtifacts>,
    pub card: Option<CardArtifacts>,
    /// Display only; the persisted split is created on confirmation.
    pub split_preview: SplitBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStatusResponse {
    pub enrollment_id: Uuid,
    pub enrollment_status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    pub provider: String,
    pub payment_id: Option<Uuid>,
    pub gateway_payment_id: Option<String>,
    /// True when `payment_status` and the artifacts come from a live poll.
    pub live: bool,
    pub billing_type: Option<BillingType>,
    pub final_amount_minor: i64,
    pub due_date: Option<NaiveDate>,
    pub invoice_url: Option<String>,
    pub pix: Option<PixArtifacts>,
    pub boleto: Option<BoletoArtifacts>,
    pub card: Option<CardArtifacts>,
    pub split_preview: Option<SplitBreakdown>,
}
