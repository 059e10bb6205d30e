pub mod config;
pub mod domain {
    pub mod canonical;
    pub mod checkout;
    pub mod coupon;
    pub mod enrollment;
    pub mod money;
    pub mod payment;
}
pub mod error;
pub mod gateways;
pub mod http {
    pub mod handlers {
        pub mod admin;
        pub mod checkout;
        pub mod gateways;
        pub mod ops;
        pub mod webhooks;
    }
    pub mod middleware {
        pub mod admin_auth;
        pub mod rate_limit;
    }
    pub mod router;
}
pub mod repo {
    pub mod memory_store;
    pub mod pg_store;
    pub mod store;
}
pub mod service {
    pub mod checkout_service;
    pub mod payment_admin;
    pub mod payment_poller;
    pub mod webhook_reconciler;
}

use crate::domain::money::RevenueShare;
use crate::gateways::registry::GatewayRegistry;
use crate::repo::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<GatewayRegistry>,
    pub checkout: service::checkout_service::CheckoutService,
    pub reconciler: service::webhook_reconciler::WebhookReconciler,
    pub admin: service::payment_admin::PaymentAdmin,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, registry: Arc<GatewayRegistry>, share: RevenueShare) -> Self {
        Self {
            checkout: service::checkout_service::CheckoutService {
                store: store.clone(),
                registry: registry.clone(),
                share,
            },
            reconciler: service::webhook_reconciler::WebhookReconciler {
                store: store.clone(),
                registry: registry.clone(),
                share,
            },
            admin: service::payment_admin::PaymentAdmin {
                store: store.clone(),
                registry: registry.clone(),
            },
            store,
            registry,
        }
    }
}
