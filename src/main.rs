use course_payments::config::{AppConfig, StoreBackend};
use course_payments::gateways::registry::GatewayRegistry;
use course_payments::http::middleware::rate_limit::RateLimitState;
use course_payments::http::router::build_router;
use course_payments::repo::memory_store::MemoryStore;
use course_payments::repo::pg_store::PgStore;
use course_payments::repo::store::Store;
use course_payments::AppState;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();
    let share = cfg.revenue_share()?;

    let store: Arc<dyn Store> = match cfg.store_backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&cfg.database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgStore { pool })
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = Arc::new(GatewayRegistry::from_config(&cfg)?);
    tracing::info!(
        active = registry.active_name().unwrap_or("none"),
        registered = ?registry.names(),
        "gateway registry ready"
    );

    let state = AppState::new(store, registry, share);
    let rate_limit = RateLimitState {
        redis_client: redis::Client::open(cfg.redis_url.clone())?,
        max_per_minute: cfg.checkout_rate_limit_per_minute,
        scope: "checkout",
    };
    let app = build_router(state, cfg.internal_api_key.clone(), Some(rate_limit));

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
