use crate::domain::canonical::{BillingType, EnrollmentStatus, PaymentStatus, WebhookEventType};
use crate::domain::enrollment::{Enrollment, RevenueSplit};
use crate::domain::money::{compute_split, RevenueShare};
use crate::domain::payment::{Payment, PaymentTransaction, TransactionSource};
use crate::error::AppError;
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::{CanonicalWebhookEvent, PaymentGateway, WebhookParseError};
use crate::repo::store::{Store, StoreTx};
use anyhow::anyhow;
use axum::http::HeaderMap;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        enrollment_id: Uuid,
        event_type: WebhookEventType,
        split_created: bool,
    },
    /// The event would regress a settled payment and was skipped.
    Stale {
        enrollment_id: Uuid,
        event_type: WebhookEventType,
    },
    /// Event type with no state transition.
    Ignored { event_type: WebhookEventType },
    /// No payment or enrollment carries the gateway payment id.
    NoMatch { gateway_payment_id: String },
    Unsupported(String),
}

impl WebhookOutcome {
    pub fn message(&self) -> String {
        match self {
            WebhookOutcome::Applied { event_type, .. } => format!("{} applied", event_type.as_str()),
            WebhookOutcome::Stale { event_type, .. } => format!("{} skipped as stale", event_type.as_str()),
            WebhookOutcome::Ignored { event_type } => format!("{} ignored", event_type.as_str()),
            WebhookOutcome::NoMatch { gateway_payment_id } => {
                format!("no enrollment for payment {}", gateway_payment_id)
            }
            WebhookOutcome::Unsupported(msg) => msg.clone(),
        }
    }
}

enum Transition {
    Applied { split_created: bool },
    Stale { current: PaymentStatus },
}

/// Whether `event_type` may move a payment that is currently `current`.
/// Settled states are not regressed by late deliveries.
pub fn transition_allowed(current: PaymentStatus, event_type: WebhookEventType) -> bool {
    match event_type {
        WebhookEventType::PaymentOverdue => !matches!(
            current,
            PaymentStatus::Confirmed | PaymentStatus::Refunded | PaymentStatus::Chargeback | PaymentStatus::Cancelled
        ),
        WebhookEventType::PaymentConfirmed => !matches!(current, PaymentStatus::Refunded | PaymentStatus::Cancelled),
        WebhookEventType::PaymentFailed => current.is_open(),
        _ => true,
    }
}

fn reconciliation(e: anyhow::Error) -> AppError {
    AppError::Reconciliation(e)
}

/// Only the headers the adapter signs over are passed on.
fn signature_headers(gateway: &dyn PaymentGateway, headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in gateway.signature_headers() {
        if let Some(value) = headers.get(*name) {
            if let Ok(key) = axum::http::HeaderName::from_bytes(name.as_bytes()) {
                out.insert(key, value.clone());
            }
        }
    }
    out
}

#[derive(Clone)]
pub struct WebhookReconciler {
    pub store: Arc<dyn Store>,
    pub registry: Arc<GatewayRegistry>,
    pub share: RevenueShare,
}

impl WebhookReconciler {
    /// Validates, parses and applies one provider callback.
    pub async fn handle(&self, provider: &str, headers: &HeaderMap, body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let gateway = self.registry.get(provider)?;
        let headers = signature_headers(gateway.as_ref(), headers);

        if !gateway.validate_webhook_signature(&headers, body) {
            tracing::warn!(provider, "webhook signature rejected");
            return Err(AppError::Signature);
        }

        let event = match gateway.parse_webhook_event(&headers, body).await {
            Ok(ev) => ev,
            Err(WebhookParseError::Malformed(msg)) => {
                tracing::warn!(provider, "malformed webhook: {}", msg);
                return Err(AppError::Validation(format!("malformed webhook payload: {}", msg)));
            }
            Err(WebhookParseError::Unsupported(msg)) => {
                tracing::info!(provider, "unsupported webhook: {}", msg);
                return Ok(WebhookOutcome::Unsupported(msg));
            }
            Err(WebhookParseError::Enrichment(e)) => return Err(AppError::Provider(e)),
        };

        self.apply_event(&event, TransactionSource::Webhook).await
    }

    /// Applies a canonical event to the matching payment and enrollment in
    /// one transaction. Shared by webhooks and the poller.
    pub async fn apply_event(
        &self,
        event: &CanonicalWebhookEvent,
        source: TransactionSource,
    ) -> Result<WebhookOutcome, AppError> {
        let payment = self
            .store
            .find_payment_by_provider_id(&event.provider, &event.gateway_payment_id)
            .await
            .map_err(reconciliation)?;
        let enrollment = match payment.as_ref() {
            Some(p) => self.store.find_enrollment(p.enrollment_id).await,
            None => {
                self.store
                    .find_enrollment_by_gateway_payment_id(&event.provider, &event.gateway_payment_id)
                    .await
            }
        }
        .map_err(reconciliation)?;

        let Some(enrollment) = enrollment else {
            tracing::info!(
                provider = %event.provider,
                gateway_payment_id = %event.gateway_payment_id,
                event = event.event_type.as_str(),
                "webhook matched no enrollment"
            );
            return Ok(WebhookOutcome::NoMatch {
                gateway_payment_id: event.gateway_payment_id.clone(),
            });
        };

        let current = payment.as_ref().map(|p| p.status).unwrap_or(enrollment.payment_status);
        let mut entry = PaymentTransaction::new(
            &event.provider,
            source,
            match source {
                TransactionSource::Poller => "poller_sync",
                _ => "webhook_received",
            },
        );
        entry.payment_id = payment.as_ref().map(|p| p.id);
        entry.enrollment_id = Some(enrollment.id);
        entry.previous_status = Some(current);
        entry.new_status = Some(event.status);
        entry.raw_payload = Some(event.payload_json());
        if let Err(e) = self.store.log_transaction(&entry).await {
            tracing::warn!(enrollment_id = %enrollment.id, "failed to log webhook transaction: {:#}", e);
        }

        if !matches!(
            event.event_type,
            WebhookEventType::PaymentConfirmed
                | WebhookEventType::PaymentOverdue
                | WebhookEventType::PaymentRefunded
                | WebhookEventType::PaymentDeleted
                | WebhookEventType::PaymentChargeback
                | WebhookEventType::PaymentFailed
        ) {
            tracing::info!(
                provider = %event.provider,
                enrollment_id = %enrollment.id,
                event = %event.provider_event_type,
                "webhook event has no transition"
            );
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let enrollment_id = enrollment.id;
        let payment_id = payment.as_ref().map(|p| p.id);
        let mut tx = self.store.begin().await.map_err(reconciliation)?;
        let applied = self.apply_in_tx(tx.as_mut(), event, enrollment_id, payment_id).await;
        let transition = match applied {
            Ok(t) => t,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!("reconciliation rollback failed: {:#}", rb);
                }
                return Err(e);
            }
        };
        tx.commit().await.map_err(reconciliation)?;

        match transition {
            Transition::Applied { split_created } => {
                tracing::info!(
                    provider = %event.provider,
                    enrollment_id = %enrollment_id,
                    gateway_payment_id = %event.gateway_payment_id,
                    event = event.event_type.as_str(),
                    split_created,
                    "payment reconciled"
                );
                Ok(WebhookOutcome::Applied {
                    enrollment_id,
                    event_type: event.event_type,
                    split_created,
                })
            }
            Transition::Stale { current } => {
                tracing::info!(
                    provider = %event.provider,
                    enrollment_id = %enrollment_id,
                    event = event.event_type.as_str(),
                    current = current.as_str(),
                    "stale webhook skipped"
                );
                Ok(WebhookOutcome::Stale {
                    enrollment_id,
                    event_type: event.event_type,
                })
            }
        }
    }

    /// Rows are re-read under lock so the guard sees every transition
    /// committed before this one.
    async fn apply_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        event: &CanonicalWebhookEvent,
        enrollment_id: Uuid,
        payment_id: Option<Uuid>,
    ) -> Result<Transition, AppError> {
        let mut enrollment = tx
            .find_enrollment_for_update(enrollment_id)
            .await
            .map_err(reconciliation)?
            .ok_or_else(|| reconciliation(anyhow!("enrollment {} disappeared", enrollment_id)))?;
        let mut payment = match payment_id {
            Some(id) => Some(
                tx.find_payment_for_update(id)
                    .await
                    .map_err(reconciliation)?
                    .ok_or_else(|| reconciliation(anyhow!("payment {} disappeared", id)))?,
            ),
            None => None,
        };

        let current = payment.as_ref().map(|p| p.status).unwrap_or(enrollment.payment_status);
        if !transition_allowed(current, event.event_type) {
            return Ok(Transition::Stale { current });
        }

        let now = Utc::now();
        let mut split_created = false;
        match event.event_type {
            WebhookEventType::PaymentConfirmed => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Confirmed;
                    p.paid_at = p.paid_at.or(event.paid_at).or(Some(now));
                    if let Some(net) = event.net_amount_minor {
                        p.net_amount_minor = net;
                    }
                }
                enrollment.status = EnrollmentStatus::Active;
                enrollment.payment_status = PaymentStatus::Confirmed;

                if tx
                    .find_revenue_split(enrollment.id)
                    .await
                    .map_err(reconciliation)?
                    .is_none()
                {
                    let split = self.split_for(event, &enrollment, payment.as_ref())?;
                    split_created = tx.insert_revenue_split(&split).await.map_err(reconciliation)?;
                }
            }
            WebhookEventType::PaymentOverdue => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Overdue;
                }
                enrollment.payment_status = PaymentStatus::Overdue;
            }
            WebhookEventType::PaymentRefunded => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Refunded;
                    p.refunded_amount_minor = event.gross_amount_minor.or(Some(p.amount_minor));
                }
                enrollment.status = EnrollmentStatus::Cancelled;
                enrollment.payment_status = PaymentStatus::Refunded;
            }
            WebhookEventType::PaymentDeleted => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Cancelled;
                }
                enrollment.status = EnrollmentStatus::Cancelled;
            }
            WebhookEventType::PaymentChargeback => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Chargeback;
                }
                enrollment.payment_status = PaymentStatus::Chargeback;
            }
            WebhookEventType::PaymentFailed => {
                if let Some(p) = payment.as_mut() {
                    p.status = PaymentStatus::Failed;
                }
                enrollment.payment_status = PaymentStatus::Failed;
            }
            _ => {}
        }

        if let Some(p) = payment.as_mut() {
            p.updated_at = now;
            tx.update_payment(p).await.map_err(reconciliation)?;
        }
        enrollment.updated_at = now;
        tx.update_enrollment(&enrollment).await.map_err(reconciliation)?;

        Ok(Transition::Applied { split_created })
    }

    /// Split from the charged amount: the payment's when recorded, else
    /// the event's, else the enrollment's final amount.
    fn split_for(
        &self,
        event: &CanonicalWebhookEvent,
        enrollment: &Enrollment,
        payment: Option<&Payment>,
    ) -> Result<RevenueSplit, AppError> {
        let gross = payment
            .map(|p| p.amount_minor)
            .or(event.gross_amount_minor)
            .unwrap_or(enrollment.final_amount_minor);
        let billing_type = payment
            .map(|p| p.billing_type)
            .or(event.billing_type)
            .unwrap_or(BillingType::Pix);
        let fees = self.registry.get(&event.provider)?.fees();
        let breakdown = compute_split(gross, billing_type, &fees, self.share)?;
        Ok(RevenueSplit::from_breakdown(enrollment, payment.map(|p| p.id), &breakdown))
    }
}
