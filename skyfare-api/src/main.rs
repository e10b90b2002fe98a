use anyhow::Context;
use skyfare_api::{app, worker, AppState, AuthConfig};
use skyfare_core::events::{EventPublisher, NoopEventPublisher};
use skyfare_core::payment::PaymentAuthorizer;
use skyfare_order::{MockPaymentAuthorizer, SettlementOrchestrator, SettlementPolicy, SettlementService};
use skyfare_store::app_config::Config;
use skyfare_store::{DbClient, EventProducer, PgSettlementStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyfare_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting SkyFare API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = match db.fetch_settlement_rules(config.settlement.clone()).await {
        Ok(rules) => rules,
        Err(e) => {
            tracing::warn!("Could not load business rules, using config defaults: {}", e);
            config.settlement.clone()
        }
    };
    rules.validate().context("Invalid settlement rules")?;

    let authorizer: Arc<dyn PaymentAuthorizer> = match config.payment.provider.as_str() {
        "mock" => Arc::new(MockPaymentAuthorizer),
        other => anyhow::bail!("Unsupported payment provider: {}", other),
    };

    let events: Arc<dyn EventPublisher> = match &config.kafka {
        Some(kafka) => Arc::new(
            EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?,
        ),
        None => {
            tracing::info!("No Kafka brokers configured, settlement events will not be published");
            Arc::new(NoopEventPublisher)
        }
    };

    let store = Arc::new(PgSettlementStore::new(db.pool.clone()));
    let policy = SettlementPolicy {
        currency: rules.currency.clone(),
        payment_timeout: rules.payment_timeout(),
        max_passengers_per_item: rules.max_passengers_per_item,
    };
    let settlement: Arc<dyn SettlementService> = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        authorizer,
        events,
        policy,
    ));

    let mut app_state = AppState::new(
        settlement.clone(),
        store,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    )
    .context("Failed to register metrics")?;

    if let Some(redis) = &config.redis {
        match RedisClient::new(&redis.url).await {
            Ok(client) => {
                app_state = app_state.with_rate_limiter(Arc::new(client), config.rate_limit.clone());
            }
            Err(e) => tracing::warn!("Redis unavailable, rate limiting disabled: {}", e),
        }
    }

    tokio::spawn(worker::start_stale_order_sweeper(
        settlement,
        rules.pending_ttl(),
        rules.sweep_interval(),
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
