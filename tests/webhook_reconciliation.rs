mod common;

use axum::http::HeaderMap;
use common::{
    checkout_request, gated_harness, harness, legacy_enrollment, mock_headers, mock_webhook, seed_enrollment, Harness,
};
use course_payments::domain::canonical::{BillingType, EnrollmentStatus, PaymentStatus, WebhookEventType};
use course_payments::domain::checkout::CheckoutResponse;
use course_payments::domain::payment::TransactionSource;
use course_payments::error::AppError;
use course_payments::gateways::CanonicalWebhookEvent;
use course_payments::service::payment_poller::PaymentPoller;
use course_payments::service::webhook_reconciler::WebhookOutcome;

async fn checkout(h: &Harness) -> CheckoutResponse {
    h.state.checkout.create_checkout(checkout_request("pix")).await.unwrap()
}

async fn deliver(h: &Harness, event: &str, gateway_payment_id: &str) -> Result<WebhookOutcome, AppError> {
    h.state
        .reconciler
        .handle("mock", &mock_headers(), &mock_webhook(event, gateway_payment_id))
        .await
}

#[tokio::test]
async fn confirmation_activates_enrollment_and_splits_revenue() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    let outcome = deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            enrollment_id: resp.enrollment_id,
            event_type: WebhookEventType::PaymentConfirmed,
            split_created: true,
        }
    );

    let snap = h.store.snapshot().await;
    let enrollment = &snap.enrollments[&resp.enrollment_id];
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.payment_status, PaymentStatus::Confirmed);

    let payment = &snap.payments[0];
    assert_eq!(payment.status, PaymentStatus::Confirmed);
    assert!(payment.paid_at.is_some());
    assert_eq!(payment.gateway_fee_minor, 198);

    let split = &snap.revenue_splits[&resp.enrollment_id];
    assert_eq!(split.payment_id, Some(payment.id));
    assert_eq!(split.gross_amount_minor, 20_000);
    assert_eq!(split.gateway_fee_minor, 198);
    assert_eq!(split.net_amount_minor, 19_802);
    assert_eq!(split.instructor_amount_minor, 13_861);
    assert_eq!(split.platform_amount_minor, 5_941);
    assert_eq!(split.instructor_id.as_deref(), Some("ins_1"));

    let received: Vec<_> = snap
        .transactions
        .iter()
        .filter(|t| t.event_type == "webhook_received")
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].previous_status, Some(PaymentStatus::Pending));
    assert_eq!(received[0].new_status, Some(PaymentStatus::Confirmed));
}

#[tokio::test]
async fn duplicate_confirmation_creates_one_split() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    let first = h.store.snapshot().await;

    let outcome = deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { split_created: false, .. }));

    let second = h.store.snapshot().await;
    assert_eq!(second.revenue_splits.len(), 1);
    assert_eq!(second.revenue_splits, first.revenue_splits);
    assert_eq!(second.payments[0].status, first.payments[0].status);
    assert_eq!(second.payments[0].paid_at, first.payments[0].paid_at);
    let (a, b) = (&first.enrollments[&resp.enrollment_id], &second.enrollments[&resp.enrollment_id]);
    assert_eq!((a.status, a.payment_status), (b.status, b.payment_status));
}

#[tokio::test]
async fn late_overdue_does_not_regress_confirmed_payment() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    let outcome = deliver(&h, "payment_overdue", &resp.gateway_payment_id).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Stale { .. }));

    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Confirmed);
    assert_eq!(snap.enrollments[&resp.enrollment_id].payment_status, PaymentStatus::Confirmed);
}

#[tokio::test]
async fn overdue_then_confirmed_ends_confirmed() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    deliver(&h, "payment_overdue", &resp.gateway_payment_id).await.unwrap();
    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Overdue);
    assert_eq!(snap.enrollments[&resp.enrollment_id].status, EnrollmentStatus::Pending);

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Confirmed);
    assert_eq!(snap.revenue_splits.len(), 1);
}

#[tokio::test]
async fn refund_cancels_enrollment() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    deliver(&h, "payment_refunded", &resp.gateway_payment_id).await.unwrap();

    let snap = h.store.snapshot().await;
    let enrollment = &snap.enrollments[&resp.enrollment_id];
    assert_eq!(enrollment.status, EnrollmentStatus::Cancelled);
    assert_eq!(enrollment.payment_status, PaymentStatus::Refunded);
    assert_eq!(snap.payments[0].status, PaymentStatus::Refunded);
    assert_eq!(snap.payments[0].refunded_amount_minor, Some(20_000));

    let outcome = deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Stale { .. }));
}

#[tokio::test]
async fn deletion_and_chargeback_transitions() {
    let h = harness("ALWAYS_SUCCESS");
    let deleted = checkout(&h).await;
    deliver(&h, "payment_deleted", &deleted.gateway_payment_id).await.unwrap();

    let charged_back = checkout(&h).await;
    deliver(&h, "payment_confirmed", &charged_back.gateway_payment_id).await.unwrap();
    deliver(&h, "payment_chargeback", &charged_back.gateway_payment_id).await.unwrap();

    let snap = h.store.snapshot().await;
    assert_eq!(snap.enrollments[&deleted.enrollment_id].status, EnrollmentStatus::Cancelled);
    assert_eq!(
        snap.enrollments[&charged_back.enrollment_id].payment_status,
        PaymentStatus::Chargeback
    );
    let statuses: Vec<_> = snap.payments.iter().map(|p| p.status).collect();
    assert!(statuses.contains(&PaymentStatus::Cancelled));
    assert!(statuses.contains(&PaymentStatus::Chargeback));
}

#[tokio::test]
async fn unknown_payment_is_acknowledged_without_changes() {
    let h = harness("ALWAYS_SUCCESS");
    let outcome = deliver(&h, "payment_confirmed", "mock_pay_unknown").await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::NoMatch { .. }));
    assert!(h.store.snapshot().await.transactions.is_empty());
}

#[tokio::test]
async fn events_without_transition_are_ignored() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;
    let outcome = deliver(&h, "payment_created", &resp.gateway_payment_id).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    assert_eq!(h.store.snapshot().await.payments[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn bad_token_is_rejected_before_parsing() {
    let h = harness("ALWAYS_SUCCESS");
    let err = h
        .state
        .reconciler
        .handle("mock", &HeaderMap::new(), b"not json")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Signature));
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let h = harness("ALWAYS_SUCCESS");
    let err = h
        .state
        .reconciler
        .handle("mock", &mock_headers(), b"not json")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let h = harness("ALWAYS_SUCCESS");
    let err = h.state.reconciler.handle("stripe", &mock_headers(), b"{}").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn audit_log_failure_does_not_block_reconciliation() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;
    h.store.fail_audit_log(true);

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    assert_eq!(h.store.snapshot().await.revenue_splits.len(), 1);
}

#[tokio::test]
async fn late_confirmation_racing_a_refund_does_not_resurrect_enrollment() {
    let (h, gate) = gated_harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    // The confirmation reads the pending payment, then stalls before its
    // transaction while the refund commits.
    gate.hold_next_begin();
    let (confirmed, refunded) = tokio::join!(
        deliver(&h, "payment_confirmed", &resp.gateway_payment_id),
        deliver(&h, "payment_refunded", &resp.gateway_payment_id),
    );

    assert_eq!(
        refunded.unwrap(),
        WebhookOutcome::Applied {
            enrollment_id: resp.enrollment_id,
            event_type: WebhookEventType::PaymentRefunded,
            split_created: false,
        }
    );
    assert_eq!(
        confirmed.unwrap(),
        WebhookOutcome::Stale {
            enrollment_id: resp.enrollment_id,
            event_type: WebhookEventType::PaymentConfirmed,
        }
    );

    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Refunded);
    let enrollment = &snap.enrollments[&resp.enrollment_id];
    assert_eq!(enrollment.status, EnrollmentStatus::Cancelled);
    assert_eq!(enrollment.payment_status, PaymentStatus::Refunded);
    assert!(snap.revenue_splits.is_empty());
}

#[tokio::test]
async fn concurrent_confirmations_create_one_split() {
    let (h, gate) = gated_harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    gate.hold_next_begin();
    let (first, second) = tokio::join!(
        deliver(&h, "payment_confirmed", &resp.gateway_payment_id),
        deliver(&h, "payment_confirmed", &resp.gateway_payment_id),
    );
    let created = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|o| matches!(o, WebhookOutcome::Applied { split_created: true, .. }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(h.store.snapshot().await.revenue_splits.len(), 1);
}

#[tokio::test]
async fn legacy_enrollment_without_payment_row_is_reconciled() {
    let h = harness("ALWAYS_SUCCESS");
    let legacy = legacy_enrollment("mock", "mock_legacy_1");
    seed_enrollment(&h.store, &legacy).await;

    let outcome = deliver(&h, "payment_confirmed", "mock_legacy_1").await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { split_created: true, .. }));

    let snap = h.store.snapshot().await;
    assert!(snap.payments.is_empty());
    assert_eq!(snap.enrollments[&legacy.id].status, EnrollmentStatus::Active);
    assert_eq!(snap.revenue_splits[&legacy.id].gross_amount_minor, 10_000);
}

#[tokio::test]
async fn legacy_lookup_does_not_cross_providers() {
    let h = harness("ALWAYS_SUCCESS");
    let legacy = legacy_enrollment("mock", "shared_123");
    seed_enrollment(&h.store, &legacy).await;

    let event = CanonicalWebhookEvent {
        provider: "asaas".to_string(),
        provider_event_id: Some("evt_1".to_string()),
        provider_event_type: "PAYMENT_RECEIVED".to_string(),
        event_type: WebhookEventType::PaymentConfirmed,
        gateway_payment_id: "shared_123".to_string(),
        customer_id: None,
        gross_amount_minor: Some(10_000),
        net_amount_minor: None,
        status: PaymentStatus::Confirmed,
        raw_status: "RECEIVED".to_string(),
        billing_type: Some(BillingType::Pix),
        paid_at: None,
        external_reference: None,
        raw_payload: b"{}".to_vec(),
    };
    let outcome = h
        .state
        .reconciler
        .apply_event(&event, TransactionSource::Webhook)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::NoMatch {
            gateway_payment_id: "shared_123".to_string()
        }
    );
    let snap = h.store.snapshot().await;
    assert_eq!(snap.enrollments[&legacy.id].status, EnrollmentStatus::Pending);
    assert!(snap.revenue_splits.is_empty());
}

fn poller(h: &Harness) -> PaymentPoller {
    PaymentPoller {
        store: h.state.store.clone(),
        registry: h.state.registry.clone(),
        reconciler: h.state.reconciler.clone(),
        min_age: chrono::Duration::minutes(5),
        batch_size: 100,
    }
}

#[tokio::test]
async fn poller_reconciles_missed_confirmation() {
    let h = harness("ALWAYS_SUCCESS");
    let confirmed = checkout(&h).await;
    let still_pending = checkout(&h).await;
    assert!(h.mock.set_status(&confirmed.gateway_payment_id, PaymentStatus::Confirmed));

    let poller = poller(&h);

    let report = poller.sweep(chrono::Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 0);

    let report = poller
        .sweep(chrono::Utc::now() + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.failed, 0);

    let snap = h.store.snapshot().await;
    assert_eq!(snap.enrollments[&confirmed.enrollment_id].status, EnrollmentStatus::Active);
    assert_eq!(snap.enrollments[&still_pending.enrollment_id].status, EnrollmentStatus::Pending);
    assert!(snap.revenue_splits.contains_key(&confirmed.enrollment_id));
    assert!(snap
        .transactions
        .iter()
        .any(|t| t.source == TransactionSource::Poller && t.event_type == "poller_sync"));
}

#[tokio::test]
async fn poller_records_rejected_charge_and_stops_polling_it() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;
    assert!(h.mock.set_status(&resp.gateway_payment_id, PaymentStatus::Failed));

    let poller = poller(&h);
    let later = chrono::Utc::now() + chrono::Duration::minutes(10);

    let report = poller.sweep(later).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.reconciled, 1);

    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Failed);
    assert_eq!(snap.enrollments[&resp.enrollment_id].payment_status, PaymentStatus::Failed);
    assert_eq!(snap.enrollments[&resp.enrollment_id].status, EnrollmentStatus::Pending);
    assert!(snap.revenue_splits.is_empty());

    let report = poller.sweep(later).await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn failure_after_confirmation_is_stale() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;
    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();

    let outcome = deliver(&h, "payment_failed", &resp.gateway_payment_id).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Stale { .. }));
    assert_eq!(h.store.snapshot().await.payments[0].status, PaymentStatus::Confirmed);
}

#[tokio::test]
async fn admin_refund_requires_confirmed_payment() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    let err = h.state.admin.refund(resp.payment_id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    deliver(&h, "payment_confirmed", &resp.gateway_payment_id).await.unwrap();
    let refund = h.state.admin.refund(resp.payment_id, Some(5_000)).await.unwrap();
    assert_eq!(refund.action, "refund_requested");
    assert_eq!(refund.status, PaymentStatus::Confirmed);

    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Confirmed);
    assert!(snap.transactions.iter().any(|t| t.event_type == "refund_requested"));
}

#[tokio::test]
async fn admin_cancel_of_pending_payment_is_logged() {
    let h = harness("ALWAYS_SUCCESS");
    let resp = checkout(&h).await;

    let cancelled = h.state.admin.cancel(resp.payment_id).await.unwrap();
    assert_eq!(cancelled.action, "cancel_requested");

    deliver(&h, "payment_deleted", &resp.gateway_payment_id).await.unwrap();
    let snap = h.store.snapshot().await;
    assert_eq!(snap.payments[0].status, PaymentStatus::Cancelled);
    assert!(snap.transactions.iter().any(|t| t.event_type == "cancel_requested"));
}
