use crate::config::AppConfig;
use crate::gateways::asaas::AsaasGateway;
use crate::gateways::mercadopago::MercadoPagoGateway;
use crate::gateways::mock::MockGateway;
use crate::gateways::transport::build_client;
use crate::gateways::PaymentGateway;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("gateway '{0}' is not registered")]
pub struct UnknownGateway(pub String);

/// Adapters by provider name. Populated at startup, then shared read-only.
/// New checkouts go to the active adapter; webhooks resolve by name so
/// in-flight payments on other providers keep reconciling.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: BTreeMap<String, Arc<dyn PaymentGateway>>,
    active: Option<String>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first adapter registered becomes active until `set_active`.
    pub fn register(&mut self, adapter: Arc<dyn PaymentGateway>) {
        let name = adapter.name().to_string();
        if self.active.is_none() {
            self.active = Some(name.clone());
        }
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, UnknownGateway> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownGateway(name.to_string()))
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), UnknownGateway> {
        if !self.adapters.contains_key(name) {
            return Err(UnknownGateway(name.to_string()));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active(&self) -> Result<Arc<dyn PaymentGateway>, UnknownGateway> {
        let name = self.active.as_deref().unwrap_or("");
        self.get(name)
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Both real providers are always registered so their webhooks keep
    /// reconciling after a switch; the mock only when enabled.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, UnknownGateway> {
        let client = build_client(cfg.gateway_timeout_ms);
        let mut registry = Self::new();
        registry.register(Arc::new(AsaasGateway {
            base_url: cfg.asaas_base_url.clone(),
            api_key: cfg.asaas_api_key.clone(),
            webhook_token: cfg.asaas_webhook_token.clone(),
            fees: cfg.asaas_fees,
            client: client.clone(),
        }));
        registry.register(Arc::new(MercadoPagoGateway {
            base_url: cfg.mercadopago_base_url.clone(),
            access_token: cfg.mercadopago_access_token.clone(),
            webhook_secret: cfg.mercadopago_webhook_secret.clone(),
            fees: cfg.mercadopago_fees,
            client,
        }));
        if cfg.enable_mock_gateway {
            registry.register(Arc::new(MockGateway::new(
                &cfg.mock_behavior,
                cfg.mock_webhook_token.clone(),
                cfg.mock_fees,
            )));
        }
        registry.set_active(&cfg.active_gateway)?;
        Ok(registry)
    }
}
