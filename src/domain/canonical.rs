use serde::{Deserialize, Serialize};

/// Status vocabulary every gateway normalizes into. It mirrors the
/// enrollment `payment_status` column plus `Failed` for anything a provider
/// reports that we do not recognize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Overdue,
    Refunded,
    Cancelled,
    Chargeback,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Chargeback => "chargeback",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => PaymentStatus::Pending,
            "confirmed" => PaymentStatus::Confirmed,
            "overdue" => PaymentStatus::Overdue,
            "refunded" => PaymentStatus::Refunded,
            "cancelled" => PaymentStatus::Cancelled,
            "chargeback" => PaymentStatus::Chargeback,
            _ => PaymentStatus::Failed,
        }
    }

    /// Whether the payment is still waiting on the customer.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Overdue)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => EnrollmentStatus::Active,
            "completed" => EnrollmentStatus::Completed,
            "cancelled" => EnrollmentStatus::Cancelled,
            _ => EnrollmentStatus::Pending,
        }
    }
}

/// Payment method as the checkout request names it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Pix,
    Boleto,
    Card,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Pix => "pix",
            BillingType::Boleto => "boleto",
            BillingType::Card => "card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pix" => Some(BillingType::Pix),
            "boleto" => Some(BillingType::Boleto),
            "card" | "credit_card" => Some(BillingType::Card),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentCreated,
    PaymentUpdated,
    PaymentConfirmed,
    PaymentOverdue,
    PaymentRefunded,
    PaymentDeleted,
    PaymentChargeback,
    /// The provider rejected the charge.
    PaymentFailed,
    Unknown,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentCreated => "payment_created",
            WebhookEventType::PaymentUpdated => "payment_updated",
            WebhookEventType::PaymentConfirmed => "payment_confirmed",
            WebhookEventType::PaymentOverdue => "payment_overdue",
            WebhookEventType::PaymentRefunded => "payment_refunded",
            WebhookEventType::PaymentDeleted => "payment_deleted",
            WebhookEventType::PaymentChargeback => "payment_chargeback",
            WebhookEventType::PaymentFailed => "payment_failed",
            WebhookEventType::Unknown => "unknown",
        }
    }

    /// Event a polled status implies, used when polling stands in for a lost
    /// webhook.
    pub fn from_status(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::Confirmed => WebhookEventType::PaymentConfirmed,
            PaymentStatus::Overdue => WebhookEventType::PaymentOverdue,
            PaymentStatus::Refunded => WebhookEventType::PaymentRefunded,
            PaymentStatus::Cancelled => WebhookEventType::PaymentDeleted,
            PaymentStatus::Chargeback => WebhookEventType::PaymentChargeback,
            PaymentStatus::Pending => WebhookEventType::PaymentUpdated,
            PaymentStatus::Failed => WebhookEventType::PaymentFailed,
        }
    }
}
