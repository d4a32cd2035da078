use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use cardvault_core::SystemClock;
use cardvault_events::{InvalidationSink, NoopInvalidationSink};
use cardvault_gateway::HttpGatewayClient;
use cardvault_infra::{
    AppConfig, InMemoryStore, LocalLease, PgCatalog, PgSweepLease, PostgresStore, Shop, ShopContext, Store,
    SweepLease,
};
use cardvault_products::{Catalog, InMemoryCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cardvault_observability::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresStore::connect(&url).await.context("failed to connect to Postgres")?;
            store.migrate().await.context("failed to apply schema")?;
            let catalog = Arc::new(PgCatalog::new(store.pool().clone()));
            let holder = format!("{}-{}", std::process::id(), uuid::Uuid::now_v7());
            let lease = Arc::new(PgSweepLease::new(store.pool().clone(), "expiry_sweep", holder));
            serve(config, store, catalog, lease, listener).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            let catalog = Arc::new(InMemoryCatalog::new());
            serve(config, InMemoryStore::new(), catalog, Arc::new(LocalLease::new()), listener).await
        }
    }
}

async fn serve<S: Store>(
    config: AppConfig,
    store: S,
    catalog: Arc<dyn Catalog>,
    lease: Arc<dyn SweepLease>,
    listener: TcpListener,
) -> anyhow::Result<()> {
    let gateway = HttpGatewayClient::new(config.gateway_config()).context("failed to build gateway client")?;
    let settings = config.shop_settings();
    let sweep_every = settings
        .sweep_interval
        .to_std()
        .context("sweep interval out of range")?;

    let shop = Shop::new(ShopContext {
        store,
        catalog,
        gateway: Arc::new(gateway),
        invalidation: invalidation_sink(&config)?,
        clock: Arc::new(SystemClock),
        lease,
        settings,
    });

    // Scheduled sweeps complement the lazy ones on the checkout path.
    let sweeper = shop.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            if let Err(err) = sweeper.sweeper().maybe_sweep().await {
                tracing::warn!(error = %err, "scheduled sweep failed");
            }
        }
    });

    let app = cardvault_api::build_app(config.jwt_secret.expose_secret().as_bytes(), shop);
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "redis")]
fn invalidation_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn InvalidationSink>> {
    use cardvault_infra::invalidation::{RedisInvalidationBus, RedisInvalidationSink, DEFAULT_CHANNEL};

    match &config.redis_url {
        Some(url) => {
            let bus = RedisInvalidationBus::new(url, DEFAULT_CHANNEL).context("invalid REDIS_URL")?;
            Ok(Arc::new(RedisInvalidationSink::new(bus)))
        }
        None => Ok(Arc::new(NoopInvalidationSink)),
    }
}

#[cfg(not(feature = "redis"))]
fn invalidation_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn InvalidationSink>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but this build has no redis support; invalidations are dropped");
    }
    Ok(Arc::new(NoopInvalidationSink))
}
