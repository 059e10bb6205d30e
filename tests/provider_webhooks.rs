mod common;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::checkout_request;
use course_payments::config::{ASAAS_DEFAULT_FEES, MERCADOPAGO_DEFAULT_FEES};
use course_payments::domain::canonical::{EnrollmentStatus, PaymentStatus, WebhookEventType};
use course_payments::domain::money::RevenueShare;
use course_payments::error::AppError;
use course_payments::gateways::asaas::AsaasGateway;
use course_payments::gateways::mercadopago::MercadoPagoGateway;
use course_payments::gateways::registry::GatewayRegistry;
use course_payments::gateways::transport::build_client;
use course_payments::gateways::{CustomerInput, PaymentGateway};
use course_payments::http::router::build_router;
use course_payments::repo::memory_store::MemoryStore;
use course_payments::service::webhook_reconciler::WebhookOutcome;
use course_payments::AppState;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const ASAAS_KEY: &str = "asaas-test-key";
const ASAAS_TOKEN: &str = "asaas-webhook-token";
const ASAAS_PAYMENT_ID: &str = "pay_fake_0001";

const MP_TOKEN: &str = "TEST-access-token";
const MP_SECRET: &str = "mp-webhook-secret";
const MP_PAYMENT_ID: &str = "987654321";
const MP_UNAVAILABLE_ID: &str = "555000111";

/// Provider API double. Counts customer creations so upserts can be checked.
#[derive(Clone, Default)]
struct FakeProvider {
    existing_customer: Option<String>,
    customers_created: Arc<AtomicUsize>,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn has_header(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers.get(name).and_then(|v| v.to_str().ok()) == Some(expected)
}

// Asaas

fn asaas_api(fake: FakeProvider) -> Router {
    Router::new()
        .route("/customers", get(asaas_find_customers).post(asaas_create_customer))
        .route("/payments", post(asaas_create_payment))
        .route("/payments/:id/pixQrCode", get(asaas_pix_qr_code))
        .with_state(fake)
}

async fn asaas_find_customers(State(fake): State<FakeProvider>, headers: HeaderMap) -> Response {
    if !has_header(&headers, "access_token", ASAAS_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let data = match fake.existing_customer {
        Some(id) => json!([{ "id": id }]),
        None => json!([]),
    };
    Json(json!({ "object": "list", "data": data })).into_response()
}

async fn asaas_create_customer(State(fake): State<FakeProvider>) -> Json<Value> {
    fake.customers_created.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "object": "customer", "id": "cus_new" }))
}

async fn asaas_create_payment(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !has_header(&headers, "access_token", ASAAS_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "object": "payment",
        "id": ASAAS_PAYMENT_ID,
        "customer": body["customer"],
        "status": "PENDING",
        "value": body["value"],
        "billingType": body["billingType"],
        "dueDate": body["dueDate"],
        "invoiceUrl": "https://sandbox.asaas.com/i/fake0001",
        "externalReference": body["externalReference"],
    }))
    .into_response()
}

async fn asaas_pix_qr_code(Path(_id): Path<String>) -> Json<Value> {
    Json(json!({
        "encodedImage": "iVBORw0KGgo=",
        "payload": "00020126580014br.gov.bcb.pix",
        "expirationDate": "2026-10-17 23:59:59",
    }))
}

fn asaas_gateway(base_url: String) -> AsaasGateway {
    AsaasGateway {
        base_url,
        api_key: ASAAS_KEY.to_string(),
        webhook_token: Some(ASAAS_TOKEN.to_string()),
        fees: ASAAS_DEFAULT_FEES,
        client: build_client(5_000),
    }
}

// Mercado Pago

fn mercadopago_api(fake: FakeProvider) -> Router {
    Router::new()
        .route("/v1/customers/search", get(mp_search_customers))
        .route("/v1/customers", post(mp_create_customer))
        .route("/v1/payments", post(mp_create_payment))
        .route("/v1/payments/:id", get(mp_get_payment))
        .with_state(fake)
}

fn mp_authorized(headers: &HeaderMap) -> bool {
    has_header(headers, "authorization", &format!("Bearer {}", MP_TOKEN))
}

async fn mp_search_customers(State(fake): State<FakeProvider>, headers: HeaderMap) -> Response {
    if !mp_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let results = match fake.existing_customer {
        Some(id) => json!([{ "id": id }]),
        None => json!([]),
    };
    Json(json!({ "paging": { "total": results.as_array().map(Vec::len) }, "results": results })).into_response()
}

async fn mp_create_customer(State(fake): State<FakeProvider>) -> Json<Value> {
    fake.customers_created.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": "mp_cus_1" }))
}

async fn mp_create_payment(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !mp_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "id": MP_PAYMENT_ID.parse::<u64>().unwrap(),
        "status": "pending",
        "status_detail": "pending_waiting_transfer",
        "transaction_amount": body["transaction_amount"],
        "payment_type_id": "bank_transfer",
        "date_of_expiration": body["date_of_expiration"],
        "external_reference": body["external_reference"],
        "point_of_interaction": {
            "transaction_data": {
                "qr_code": "00020126580014br.gov.bcb.pix",
                "qr_code_base64": "iVBORw0KGgo=",
                "ticket_url": "https://www.mercadopago.com.br/payments/987654321/ticket",
            }
        },
    }))
    .into_response()
}

async fn mp_get_payment(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !mp_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id == MP_UNAVAILABLE_ID {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response();
    }
    if id != MP_PAYMENT_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Payment not found" }))).into_response();
    }
    Json(json!({
        "id": MP_PAYMENT_ID.parse::<u64>().unwrap(),
        "status": "approved",
        "status_detail": "accredited",
        "transaction_amount": 200.0,
        "transaction_details": { "net_received_amount": 198.02 },
        "payment_type_id": "bank_transfer",
        "date_approved": "2026-10-14T10:15:00.000-03:00",
        "payer": { "id": "mp_cus_1" },
    }))
    .into_response()
}

fn mercadopago_gateway(base_url: String) -> MercadoPagoGateway {
    MercadoPagoGateway {
        base_url,
        access_token: MP_TOKEN.to_string(),
        webhook_secret: Some(MP_SECRET.to_string()),
        fees: MERCADOPAGO_DEFAULT_FEES,
        client: build_client(5_000),
    }
}

fn mp_notification(data_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": 12345678,
        "live_mode": false,
        "type": "payment",
        "action": "payment.updated",
        "data": { "id": data_id },
    }))
    .unwrap()
}

fn mp_signed_headers(data_id: &str) -> HeaderMap {
    let ts = "1760443200";
    let request_id = "req-7f1c";
    let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
    let mut mac = Hmac::<Sha256>::new_from_slice(MP_SECRET.as_bytes()).unwrap();
    mac.update(manifest.as_bytes());
    let v1 = hex::encode(mac.finalize().into_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-signature",
        HeaderValue::from_str(&format!("ts={},v1={}", ts, v1)).unwrap(),
    );
    headers.insert("x-request-id", HeaderValue::from_static(request_id));
    headers
}

fn state_with(store: &MemoryStore, gateway: Arc<dyn PaymentGateway>) -> AppState {
    let mut registry = GatewayRegistry::new();
    registry.register(gateway);
    AppState::new(Arc::new(store.clone()), Arc::new(registry), RevenueShare::default())
}

fn customer() -> CustomerInput {
    CustomerInput {
        name: "Ana Souza".to_string(),
        email: "ana@example.com".to_string(),
        document: "123.456.789-09".to_string(),
        phone: None,
    }
}

#[tokio::test]
async fn signed_mercadopago_notification_is_enriched_and_reconciled() {
    let base_url = serve(mercadopago_api(FakeProvider::default())).await;
    let store = MemoryStore::new();
    let state = state_with(&store, Arc::new(mercadopago_gateway(base_url)));

    let resp = state.checkout.create_checkout(checkout_request("pix")).await.unwrap();
    assert_eq!(resp.provider, "mercadopago");
    assert_eq!(resp.gateway_payment_id, MP_PAYMENT_ID);
    assert!(resp.pix.as_ref().and_then(|p| p.copy_paste.as_ref()).is_some());

    let outcome = state
        .reconciler
        .handle("mercadopago", &mp_signed_headers(MP_PAYMENT_ID), &mp_notification(MP_PAYMENT_ID))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Applied {
            enrollment_id: resp.enrollment_id,
            event_type: WebhookEventType::PaymentConfirmed,
            split_created: true,
        }
    );

    let snap = store.snapshot().await;
    let enrollment = &snap.enrollments[&resp.enrollment_id];
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.payment_status, PaymentStatus::Confirmed);
    assert_eq!(snap.payments[0].status, PaymentStatus::Confirmed);
    assert_eq!(snap.payments[0].net_amount_minor, 19_802);
    assert!(snap.payments[0].paid_at.is_some());

    let split = &snap.revenue_splits[&resp.enrollment_id];
    assert_eq!(split.gateway_fee_minor, 198);
    assert_eq!(split.instructor_amount_minor, 13_861);
    assert_eq!(split.platform_amount_minor, 5_941);
}

#[tokio::test]
async fn mercadopago_enrichment_outage_answers_500() {
    let base_url = serve(mercadopago_api(FakeProvider::default())).await;
    let store = MemoryStore::new();
    let state = state_with(&store, Arc::new(mercadopago_gateway(base_url)));

    let err = state
        .reconciler
        .handle(
            "mercadopago",
            &mp_signed_headers(MP_UNAVAILABLE_ID),
            &mp_notification(MP_UNAVAILABLE_ID),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Provider(_)));

    let mut request = Request::builder()
        .method("POST")
        .uri("/webhooks/mercadopago")
        .header("content-type", "application/json");
    for (name, value) in mp_signed_headers(MP_UNAVAILABLE_ID).iter() {
        request = request.header(name, value);
    }
    let resp = build_router(state, "admin-key".to_string(), None)
        .oneshot(request.body(Body::from(mp_notification(MP_UNAVAILABLE_ID))).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(store.snapshot().await.revenue_splits.is_empty());
}

#[tokio::test]
async fn mercadopago_notification_with_forged_signature_is_rejected() {
    let base_url = serve(mercadopago_api(FakeProvider::default())).await;
    let store = MemoryStore::new();
    let state = state_with(&store, Arc::new(mercadopago_gateway(base_url)));

    let err = state
        .reconciler
        .handle("mercadopago", &mp_signed_headers("111"), &mp_notification(MP_PAYMENT_ID))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Signature));
    assert!(store.snapshot().await.transactions.is_empty());
}

#[tokio::test]
async fn asaas_inline_payload_reconciles_with_access_token() {
    let base_url = serve(asaas_api(FakeProvider::default())).await;
    let store = MemoryStore::new();
    let state = state_with(&store, Arc::new(asaas_gateway(base_url)));

    let resp = state.checkout.create_checkout(checkout_request("pix")).await.unwrap();
    assert_eq!(resp.gateway_payment_id, ASAAS_PAYMENT_ID);
    assert_eq!(
        resp.pix.as_ref().and_then(|p| p.qr_code_base64.as_deref()),
        Some("iVBORw0KGgo=")
    );

    let body = serde_json::to_vec(&json!({
        "id": "evt_05b708f961d739ea7eba7e4db318f621",
        "event": "PAYMENT_RECEIVED",
        "payment": {
            "object": "payment",
            "id": ASAAS_PAYMENT_ID,
            "customer": "cus_new",
            "status": "RECEIVED",
            "value": 200.0,
            "netValue": 198.02,
            "billingType": "PIX",
            "confirmedDate": "2026-10-14",
            "paymentDate": "2026-10-14",
            "externalReference": resp.enrollment_id.to_string(),
        }
    }))
    .unwrap();

    let mut wrong = HeaderMap::new();
    wrong.insert("asaas-access-token", HeaderValue::from_static("not-the-token"));
    let err = state.reconciler.handle("asaas", &wrong, &body).await.unwrap_err();
    assert!(matches!(err, AppError::Signature));

    let mut headers = HeaderMap::new();
    headers.insert("asaas-access-token", HeaderValue::from_static(ASAAS_TOKEN));
    let outcome = state.reconciler.handle("asaas", &headers, &body).await.unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Applied {
            event_type: WebhookEventType::PaymentConfirmed,
            split_created: true,
            ..
        }
    ));

    let snap = store.snapshot().await;
    assert_eq!(snap.enrollments[&resp.enrollment_id].status, EnrollmentStatus::Active);
    assert_eq!(snap.payments[0].status, PaymentStatus::Confirmed);
    assert_eq!(snap.revenue_splits[&resp.enrollment_id].net_amount_minor, 19_802);
}

#[tokio::test]
async fn asaas_reuses_customer_found_by_document() {
    let fake = FakeProvider {
        existing_customer: Some("cus_existing".to_string()),
        ..FakeProvider::default()
    };
    let created = fake.customers_created.clone();
    let gateway = asaas_gateway(serve(asaas_api(fake)).await);

    assert_eq!(gateway.create_customer(&customer()).await.unwrap(), "cus_existing");
    assert_eq!(created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn asaas_creates_customer_when_none_matches() {
    let fake = FakeProvider::default();
    let created = fake.customers_created.clone();
    let gateway = asaas_gateway(serve(asaas_api(fake)).await);

    assert_eq!(gateway.create_customer(&customer()).await.unwrap(), "cus_new");
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mercadopago_customer_upsert() {
    let fake = FakeProvider::default();
    let created = fake.customers_created.clone();
    let gateway = mercadopago_gateway(serve(mercadopago_api(fake)).await);
    assert_eq!(gateway.create_customer(&customer()).await.unwrap(), "mp_cus_1");
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let fake = FakeProvider {
        existing_customer: Some("1234567-abcDEF".to_string()),
        ..FakeProvider::default()
    };
    let created = fake.customers_created.clone();
    let gateway = mercadopago_gateway(serve(mercadopago_api(fake)).await);
    assert_eq!(gateway.create_customer(&customer()).await.unwrap(), "1234567-abcDEF");
    assert_eq!(created.load(Ordering::SeqCst), 0);
}
