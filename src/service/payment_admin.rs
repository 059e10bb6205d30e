use crate::domain::canonical::PaymentStatus;
use crate::domain::payment::{Payment, PaymentTransaction, TransactionSource};
use crate::error::AppError;
use crate::gateways::registry::GatewayRegistry;
use crate::repo::store::Store;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AdminActionResponse {
    pub payment_id: Uuid,
    pub provider: String,
    pub gateway_payment_id: String,
    pub action: &'static str,
    /// Stored status; it moves when the provider's webhook arrives.
    pub status: PaymentStatus,
    pub provider_status: Option<String>,
}

/// Refunds and cancellations requested by operators. The provider is asked
/// to act; local state follows from the resulting webhook.
#[derive(Clone)]
pub struct PaymentAdmin {
    pub store: Arc<dyn Store>,
    pub registry: Arc<GatewayRegistry>,
}

impl PaymentAdmin {
    async fn load(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {} not found", payment_id)))
    }

    pub async fn refund(&self, payment_id: Uuid, amount_minor: Option<i64>) -> Result<AdminActionResponse, AppError> {
        let payment = self.load(payment_id).await?;
        if payment.status != PaymentStatus::Confirmed {
            return Err(AppError::Validation(format!(
                "only confirmed payments can be refunded (status {})",
                payment.status.as_str()
            )));
        }
        if let Some(amount) = amount_minor {
            if amount <= 0 || amount > payment.amount_minor {
                return Err(AppError::Validation(format!(
                    "refund amount must be in 1..={}",
                    payment.amount_minor
                )));
            }
        }

        let gateway = self.registry.get(&payment.provider)?;
        let resp = gateway.refund_payment(&payment.provider_payment_id, amount_minor).await?;

        let mut entry = PaymentTransaction::new(&payment.provider, TransactionSource::Api, "refund_requested");
        entry.payment_id = Some(payment.id);
        entry.enrollment_id = Some(payment.enrollment_id);
        entry.previous_status = Some(payment.status);
        entry.new_status = Some(resp.status);
        entry.raw_payload = serde_json::to_value(&resp).ok();
        self.log(&entry).await;

        Ok(AdminActionResponse {
            payment_id: payment.id,
            provider: payment.provider,
            gateway_payment_id: payment.provider_payment_id,
            action: "refund_requested",
            status: payment.status,
            provider_status: Some(resp.raw_status),
        })
    }

    pub async fn cancel(&self, payment_id: Uuid) -> Result<AdminActionResponse, AppError> {
        let payment = self.load(payment_id).await?;
        if !payment.status.is_open() {
            return Err(AppError::Validation(format!(
                "only pending or overdue payments can be cancelled (status {})",
                payment.status.as_str()
            )));
        }

        let gateway = self.registry.get(&payment.provider)?;
        gateway.cancel_payment(&payment.provider_payment_id).await?;

        let mut entry = PaymentTransaction::new(&payment.provider, TransactionSource::Api, "cancel_requested");
        entry.payment_id = Some(payment.id);
        entry.enrollment_id = Some(payment.enrollment_id);
        entry.previous_status = Some(payment.status);
        self.log(&entry).await;

        Ok(AdminActionResponse {
            payment_id: payment.id,
            provider: payment.provider,
            gateway_payment_id: payment.provider_payment_id,
            action: "cancel_requested",
            status: payment.status,
            provider_status: None,
        })
    }

    async fn log(&self, entry: &PaymentTransaction) {
        if let Err(e) = self.store.log_transaction(entry).await {
            tracing::warn!(event = %entry.event_type, "failed to log admin transaction: {:#}", e);
        }
    }
}
