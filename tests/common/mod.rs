#![allow(dead_code)]

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use course_payments::config::ASAAS_DEFAULT_FEES;
use course_payments::domain::checkout::CheckoutRequest;
use course_payments::domain::coupon::{Coupon, DiscountKind};
use course_payments::domain::enrollment::{Enrollment, RevenueSplit};
use course_payments::domain::money::RevenueShare;
use course_payments::domain::payment::{Payment, PaymentTransaction};
use course_payments::gateways::mock::MockGateway;
use course_payments::gateways::registry::GatewayRegistry;
use course_payments::repo::memory_store::MemoryStore;
use course_payments::repo::store::{Store, StoreTx};
use course_payments::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const MOCK_TOKEN: &str = "mock-webhook-secret";

pub struct Harness {
    pub state: AppState,
    pub store: MemoryStore,
    pub mock: Arc<MockGateway>,
}

pub fn harness(behavior: &str) -> Harness {
    let store = MemoryStore::new();
    build_harness(behavior, store.clone(), Arc::new(store))
}

/// Harness whose store can hold back the next `begin`, so two requests
/// overlap deterministically.
pub fn gated_harness(behavior: &str) -> (Harness, Arc<GatedStore>) {
    let store = MemoryStore::new();
    let gated = Arc::new(GatedStore::new(store.clone()));
    (build_harness(behavior, store, gated.clone()), gated)
}

fn build_harness(behavior: &str, store: MemoryStore, backend: Arc<dyn Store>) -> Harness {
    let mock = Arc::new(MockGateway::new(
        behavior,
        Some(MOCK_TOKEN.to_string()),
        ASAAS_DEFAULT_FEES,
    ));
    let mut registry = GatewayRegistry::new();
    registry.register(mock.clone());
    let state = AppState::new(backend, Arc::new(registry), RevenueShare::default());
    Harness { state, store, mock }
}

pub struct GatedStore {
    inner: MemoryStore,
    hold_next_begin: AtomicBool,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            hold_next_begin: AtomicBool::new(false),
        }
    }

    /// The next `begin` sleeps before opening its transaction.
    pub fn hold_next_begin(&self) {
        self.hold_next_begin.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Store for GatedStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        if self.hold_next_begin.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.begin().await
    }

    async fn find_enrollment(&self, id: Uuid) -> anyhow::Result<Option<Enrollment>> {
        self.inner.find_enrollment(id).await
    }

    async fn find_enrollment_by_gateway_payment_id(
        &self,
        provider: &str,
        gateway_payment_id: &str,
    ) -> anyhow::Result<Option<Enrollment>> {
        self.inner
            .find_enrollment_by_gateway_payment_id(provider, gateway_payment_id)
            .await
    }

    async fn find_payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>> {
        self.inner.find_payment(id).await
    }

    async fn find_payment_by_provider_id(
        &self,
        provider: &str,
        provider_payment_id: &str,
    ) -> anyhow::Result<Option<Payment>> {
        self.inner.find_payment_by_provider_id(provider, provider_payment_id).await
    }

    async fn latest_payment_for_enrollment(&self, enrollment_id: Uuid) -> anyhow::Result<Option<Payment>> {
        self.inner.latest_payment_for_enrollment(enrollment_id).await
    }

    async fn list_open_payments(&self, older_than: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<Payment>> {
        self.inner.list_open_payments(older_than, limit).await
    }

    async fn find_coupon_by_code(&self, code: &str) -> anyhow::Result<Option<Coupon>> {
        self.inner.find_coupon_by_code(code).await
    }

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: &str) -> anyhow::Result<i64> {
        self.inner.count_coupon_usages(coupon_id, user_id).await
    }

    async fn find_revenue_split(&self, enrollment_id: Uuid) -> anyhow::Result<Option<RevenueSplit>> {
        self.inner.find_revenue_split(enrollment_id).await
    }

    async fn log_transaction(&self, entry: &PaymentTransaction) -> anyhow::Result<()> {
        self.inner.log_transaction(entry).await
    }
}

pub fn checkout_request(method: &str) -> CheckoutRequest {
    CheckoutRequest {
        student_id: "stu_1".to_string(),
        student_name: "Ana Souza".to_string(),
        student_email: "ana@example.com".to_string(),
        student_document: "12345678909".to_string(),
        student_phone: None,
        course_id: "course_rust".to_string(),
        course_title: "Rust for Backend Developers".to_string(),
        instructor_id: Some("ins_1".to_string()),
        amount_minor: 20_000,
        discount_code: None,
        payment_method: method.to_string(),
        card: None,
    }
}

pub fn coupon(code: &str, kind: DiscountKind, value: i64) -> Coupon {
    Coupon {
        id: Uuid::new_v4(),
        code: code.to_string(),
        kind,
        value,
        max_discount_minor: None,
        min_order_minor: None,
        max_uses: None,
        uses_count: 0,
        max_uses_per_user: None,
        active: true,
        valid_from: None,
        valid_until: None,
    }
}

pub fn mock_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-mock-webhook-token", HeaderValue::from_static(MOCK_TOKEN));
    headers
}

pub fn mock_webhook(event: &str, payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "event": event,
        "payment_id": payment_id,
    }))
    .unwrap()
}

/// Pending enrollment with no payment row, as rows written before the
/// payments table existed.
pub fn legacy_enrollment(provider: &str, gateway_payment_id: &str) -> Enrollment {
    let now = Utc::now();
    Enrollment {
        id: Uuid::new_v4(),
        student_id: "stu_legacy".to_string(),
        student_name: "Bruno Lima".to_string(),
        student_email: "bruno@example.com".to_string(),
        course_id: "course_sql".to_string(),
        course_title: "SQL Essentials".to_string(),
        instructor_id: Some("ins_2".to_string()),
        status: course_payments::domain::canonical::EnrollmentStatus::Pending,
        payment_status: course_payments::domain::canonical::PaymentStatus::Pending,
        gross_amount_minor: 10_000,
        discount_amount_minor: 0,
        final_amount_minor: 10_000,
        coupon_id: None,
        provider: provider.to_string(),
        gateway_payment_id: Some(gateway_payment_id.to_string()),
        created_at: now,
        updated_at: now,
    }
}

pub async fn seed_enrollment(store: &MemoryStore, enrollment: &Enrollment) {
    let mut tx = store.begin().await.unwrap();
    tx.insert_enrollment(enrollment).await.unwrap();
    tx.commit().await.unwrap();
}
