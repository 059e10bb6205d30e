use crate::domain::canonical::{PaymentStatus, WebhookEventType};
use crate::domain::payment::{Payment, TransactionSource};
use crate::error::AppError;
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::CanonicalWebhookEvent;
use crate::repo::store::Store;
use crate::service::webhook_reconciler::{WebhookOutcome, WebhookReconciler};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reconciled: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Pulls provider status for open payments whose webhook may have been
/// lost, and feeds changes through the reconciler.
#[derive(Clone)]
pub struct PaymentPoller {
    pub store: Arc<dyn Store>,
    pub registry: Arc<GatewayRegistry>,
    pub reconciler: WebhookReconciler,
    pub min_age: Duration,
    pub batch_size: i64,
}

impl PaymentPoller {
    pub async fn sweep(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let open = self.store.list_open_payments(now - self.min_age, self.batch_size).await?;
        let mut report = SweepReport {
            scanned: open.len(),
            ..SweepReport::default()
        };

        for payment in open {
            match self.poll_one(&payment).await {
                Ok(Some(WebhookOutcome::Applied { .. })) => report.reconciled += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        provider = %payment.provider,
                        gateway_payment_id = %payment.provider_payment_id,
                        "poll failed: {}",
                        e
                    );
                }
            }
        }
        Ok(report)
    }

    async fn poll_one(&self, payment: &Payment) -> Result<Option<WebhookOutcome>, AppError> {
        let gateway = self.registry.get(&payment.provider)?;
        let remote = gateway.get_payment(&payment.provider_payment_id).await?;
        if remote.status == payment.status {
            return Ok(None);
        }

        let event = CanonicalWebhookEvent {
            provider: payment.provider.clone(),
            provider_event_id: None,
            provider_event_type: format!("poll:{}", remote.raw_status),
            event_type: WebhookEventType::from_status(remote.status),
            gateway_payment_id: remote.gateway_payment_id.clone(),
            customer_id: None,
            gross_amount_minor: Some(remote.gross_amount_minor),
            net_amount_minor: remote.net_amount_minor,
            status: remote.status,
            raw_status: remote.raw_status.clone(),
            billing_type: Some(remote.billing_type),
            paid_at: (remote.status == PaymentStatus::Confirmed).then(Utc::now),
            external_reference: Some(payment.enrollment_id.to_string()),
            raw_payload: serde_json::to_vec(&remote).unwrap_or_default(),
        };
        self.reconciler
            .apply_event(&event, TransactionSource::Poller)
            .await
            .map(Some)
    }
}
