//! Appliance requester.
//!
//! Accepts appliance submissions, negotiates placement offers with the
//! resource coordinator, places appliances on clusters, and serves their live
//! status.

use std::sync::Arc;

use anyhow::{Context, Result};
use requester::{
    api,
    appliance::{ApplianceManager, ApplianceRecord},
    cluster::ClusterRegistry,
    config,
    coordinator::CoordinatorClient,
    expiry::OfferExpiryWorker,
    image::{ImageRecord, ImageRegistry},
    state::AppState,
    store::{ApplianceStore, MemoryStore, PgDatabase, Registry},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to REQUESTER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting requester");
    info!(
        listen_addr = %config.listen_addr,
        public_url = %config.public_url,
        coordinator_url = %config.coordinator_url,
        "Configuration loaded"
    );

    let (appliance_store, image_store): (Arc<dyn ApplianceStore>, Arc<dyn Registry<ImageRecord>>) =
        match &config.database {
            Some(db_config) => {
                let db = match PgDatabase::connect(db_config).await {
                    Ok(db) => {
                        info!("Database connection established");
                        db
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to connect to database");
                        return Err(e.into());
                    }
                };

                // Run migrations in dev mode
                if config.dev_mode {
                    info!("Running database migrations (dev mode)");
                    if let Err(e) = db.run_migrations().await {
                        error!(error = %e, "Failed to run migrations");
                        return Err(e.into());
                    }
                }

                (
                    Arc::new(db.store::<ApplianceRecord>()),
                    Arc::new(db.store::<ImageRecord>()),
                )
            }
            None => {
                warn!("DATABASE_URL not set, registries are kept in memory");
                (
                    Arc::new(MemoryStore::<ApplianceRecord>::new()),
                    Arc::new(MemoryStore::<ImageRecord>::new()),
                )
            }
        };

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let images = ImageRegistry::new(image_store);
    let manager = Arc::new(ApplianceManager::new(
        appliance_store,
        images.clone(),
        CoordinatorClient::new(
            http.clone(),
            config.coordinator_url.clone(),
            config.framework_name.clone(),
        ),
        ClusterRegistry::new(http),
        config.public_url.clone(),
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start offer expiry worker when a timeout is configured
    let expiry_handle = config.offer_timeout.map(|timeout| {
        let worker = OfferExpiryWorker::new(manager.clone(), timeout, config.expiry_interval);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        })
    });
    if expiry_handle.is_none() {
        info!("No offer timeout configured, appliances wait for offers indefinitely");
    }

    let state = AppState::new(manager, images);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    if let Some(handle) = expiry_handle {
        let shutdown_timeout = std::time::Duration::from_secs(10);
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Offer expiry worker did not shut down in time");
        }
    }

    info!("Requester shutdown complete");
    Ok(())
}
