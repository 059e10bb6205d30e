use anyhow::Result;
use course_payments::config::AppConfig;
use course_payments::gateways::registry::GatewayRegistry;
use course_payments::repo::pg_store::PgStore;
use course_payments::repo::store::Store;
use course_payments::service::payment_poller::PaymentPoller;
use course_payments::service::webhook_reconciler::WebhookReconciler;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let store: Arc<dyn Store> = Arc::new(PgStore { pool });
    let registry = Arc::new(GatewayRegistry::from_config(&cfg)?);
    let poller = PaymentPoller {
        store: store.clone(),
        registry: registry.clone(),
        reconciler: WebhookReconciler {
            store,
            registry,
            share: cfg.revenue_share()?,
        },
        min_age: chrono::Duration::seconds(cfg.poller_min_age_secs),
        batch_size: cfg.poller_batch_size,
    };

    loop {
        match poller.sweep(chrono::Utc::now()).await {
            Ok(report) if report.scanned > 0 => tracing::info!(
                scanned = report.scanned,
                reconciled = report.reconciled,
                unchanged = report.unchanged,
                failed = report.failed,
                "poll sweep finished"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!("poll sweep failed: {:#}", e),
        }

        tokio::time::sleep(std::time::Duration::from_secs(cfg.poller_interval_secs)).await;
    }
}
