//! OpenSASE ERP Sync - storefront and ERP reconciliation service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_erp_sync::api::{self, AppState};
use opensase_erp_sync::erp::ErpClient;
use opensase_erp_sync::publisher::EventPublisher;
use opensase_erp_sync::store::{FsMediaStore, MemoryStore, Repositories};
use opensase_erp_sync::sync::orders::listen_for_placed_orders;
use opensase_erp_sync::sync::{CatalogReconciler, InventoryReconciler, KeyedLocks, OrderPropagator, SyncJobs};
use opensase_erp_sync::webhooks::WebhookIngestor;
use opensase_erp_sync::SyncConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Arc::new(SyncConfig::from_env()?);

    let mut repos = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Repositories::postgres(db)
        }
        Err(_) => {
            warn!("DATABASE_URL not set; using the in-memory store");
            Repositories::from_memory(Arc::new(MemoryStore::new()))
        }
    };
    if let Some(dir) = &config.media_dir {
        repos = repos.with_media(Arc::new(FsMediaStore::new(dir)));
    }

    let nats = match std::env::var("NATS_URL") {
        Ok(url) => match async_nats::connect(&url).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "NATS unavailable; events will not be published");
                None
            }
        },
        Err(_) => None,
    };
    let publisher = EventPublisher::new(nats.clone());

    let erp = Arc::new(ErpClient::new(config.erp.clone())?);
    let locks = KeyedLocks::new();
    let shutdown = CancellationToken::new();
    let inventory = Arc::new(InventoryReconciler::new(
        erp.clone(), repos.clone(), locks.clone(), config.default_location.clone(),
        config.create_missing_inventory, config.page_size,
    ));
    let catalog = Arc::new(CatalogReconciler::new(erp.clone(), repos.clone(), inventory.clone(), locks.clone(), config.clone()));
    let jobs = SyncJobs::new(catalog.clone(), inventory.clone(), locks.clone(), publisher.clone(), shutdown.clone());
    let webhooks = Arc::new(WebhookIngestor::new(catalog, inventory, repos.clone(), locks.clone(), publisher.clone()));
    let propagator = Arc::new(OrderPropagator::new(erp, repos.clone(), locks, publisher, config.auto_confirm_orders));

    let mut tasks = jobs.spawn(&config);
    if let Some(client) = nats {
        tasks.push(tokio::spawn(listen_for_placed_orders(client, propagator.clone(), shutdown.clone())));
    }

    let app = api::router(AppState { config: config.clone(), repos, jobs, webhooks, propagator });
    let port = std::env::var("PORT").unwrap_or_else(|_| "8084".to_string());
    info!(catalog_cadence = %config.catalog_cadence, inventory_cadence = %config.inventory_cadence, "OpenSASE ERP Sync listening on 0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        signal.cancel();
    }).await?;

    shutdown.cancel();
    for task in tasks { task.await.ok(); }
    Ok(())
}
