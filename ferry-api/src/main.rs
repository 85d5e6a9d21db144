use anyhow::Context;
use ferry_api::{app, worker, AppState};
use ferry_order::MockPaymentGateway;
use ferry_store::{Config, DbClient, MemoryStore, RedisClient, Repositories, StorageBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ferry_api=debug,ferry_order=debug,ferry_catalog=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Ferry API on port {}", config.server.port);

    let repos = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store, data is lost on restart");
            Repositories::memory(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let db_config = config
                .database
                .as_ref()
                .context("storage.backend is postgres but [database] is missing")?;
            let db = DbClient::new(db_config)
                .await
                .context("Failed to connect to Postgres")?;
            if db_config.run_migrations {
                db.migrate().await.context("Failed to run migrations")?;
            }
            Repositories::postgres(db.pool)
        }
    };

    let redis = match &config.redis {
        Some(redis_config) => match RedisClient::new(&redis_config.url).await {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let app_state = AppState::new(&config, repos, Arc::new(MockPaymentGateway::new()), redis);

    tokio::spawn(worker::start_reconciliation_worker(
        app_state.reconciler.clone(),
        Duration::from_secs(config.business_rules.reconcile_interval_secs.max(1)),
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
